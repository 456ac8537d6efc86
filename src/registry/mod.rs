mod core;

pub use self::core::ControllerRegistry;
