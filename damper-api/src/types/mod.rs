//! Request and response types for the DAMPER API

mod governed;

pub use governed::{
    GovernedBatchRequest, GovernedBatchResponse, GovernedBatchSummary, GovernedRequest,
    GovernedResponse,
};
