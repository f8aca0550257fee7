pub mod continuation;
pub mod intercept;

pub use continuation::{ContinuationContext, ContinuationState, InFlightRegistry, Released};
pub use intercept::{CallbackToken, InterceptAgent, InterceptAgentFactory, ScanCallback};
