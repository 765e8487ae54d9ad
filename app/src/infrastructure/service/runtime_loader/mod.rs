pub mod conda;

pub use self::conda::CondaLoader;
