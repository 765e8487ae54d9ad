pub mod launch;
pub mod submit;

pub mod prelude {
    #[rustfmt::skip]
    pub use super::{
        launch::{LaunchPlan, LaunchService},
        submit::SubmitService,
    };
}
