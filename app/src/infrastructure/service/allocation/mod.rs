pub mod pbs;
pub mod slurm;

#[rustfmt::skip]
pub use self::{
    pbs::PbsAllocation,
    slurm::SlurmAllocation,
};
