pub mod request;
pub mod script;
pub mod worker;

#[rustfmt::skip]
pub use self::{
    request::{GpuSpec, ResourceRequest, SignalSpec},
    script::ScriptSpec,
    worker::{RunType, WorkerCommand},
};
