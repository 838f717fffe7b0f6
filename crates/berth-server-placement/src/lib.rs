// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Replica placement: primary selection by weighted load score, affinity-
//! ranked replica sets, and lag-budgeted read routing.

pub mod error;
pub mod placement;
pub mod routing;
pub mod score;

pub use error::{PlacementError, Result};
pub use placement::{PlacementConfig, PlacementOutcome, PlacementService};
pub use routing::{route_read, LagMetric};
pub use score::{load_score, min_by_score, ScoreWeights};
