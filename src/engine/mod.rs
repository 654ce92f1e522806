pub mod callbacks;
pub mod fetcher;
pub mod module;
pub mod progress;

pub use callbacks::{Callback, CallbackRegistry};
pub use fetcher::{
    ExecutionPlan, Fetcher, FetcherCallback, FetcherEvent, ModuleList, PlannedRequest,
};
pub use module::{
    FetchMode, Module, ModuleCallback, ModuleClass, ModuleDefinition, ModuleEvent, Participation,
};
pub use progress::Progress;
