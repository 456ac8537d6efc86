mod core;

pub use self::core::{ChangedProperties, HasChanged, PropertyStore, not_equal};
