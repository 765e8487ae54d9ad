pub mod models;
pub mod pbs_client;

#[rustfmt::skip]
pub use self::{
    models::*,
    pbs_client::*,
};
