//! The four workflow kinds a mixing session can be running (§4.6): each
//! owns its own [`common::WorkflowState`] and is driven independently by
//! the manager's maintainer tasks.

pub mod common;
pub mod denominate;
pub mod new_collateral;
pub mod new_denoms;
pub mod pay_collateral;

pub use common::{PsTxData, WorkflowState};
pub use denominate::DenominateOffer;
pub use new_collateral::NewCollateralWorkflow;
pub use new_denoms::NewDenomsWorkflow;
pub use pay_collateral::PayCollateralWorkflow;
