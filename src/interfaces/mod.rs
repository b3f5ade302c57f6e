pub mod csv;
pub mod relay;
