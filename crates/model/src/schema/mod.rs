pub mod drift;
pub mod field_map;
pub mod version;
