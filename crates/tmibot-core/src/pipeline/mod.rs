//! Handler pipeline: handler trait, registry and dispatcher.

pub mod dispatcher;
pub mod handler;
pub mod registry;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use handler::{
    BoxFuture, BoxedHandler, Handler, HandlerContext, HandlerResult, Outcome, into_handler,
};
pub use registry::{
    HandlerSource, NamedHandler, NamedSaveHook, Registry, RoleBinding, SaveHook, Stage,
};
