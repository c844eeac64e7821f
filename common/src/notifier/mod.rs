// Menu delivery: the dispatcher and the service facade

pub mod dispatcher;
pub mod service;

pub use dispatcher::{DispatchReport, DispatchTrigger, MenuDispatcher};
pub use service::NotifierService;
