pub mod clock;
pub mod destinations;
pub mod error;
pub mod model;
