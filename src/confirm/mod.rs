// Confirmation module
// Operator confirmation of detected points, with injected clock and input

pub mod driver;
pub mod workflow;

pub use driver::await_resolution;
pub use workflow::{
    ActiveConfirmations, ActiveSlot, Clock, ConfirmMode, ConfirmationSignal, ConfirmationState,
    ConfirmationWorkflow, DisplayHandle, Resolution, TokioClock,
    WorkflowError,
};
