pub mod job;
pub mod runtime;

#[rustfmt::skip]
pub use self::{
    job::Job,
    runtime::RuntimeEnv,
};
