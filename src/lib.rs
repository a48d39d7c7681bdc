pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod machine;
pub mod platform;
pub mod processing;
pub mod tasks {
    pub mod capture;
}

pub use machine::{Cycle, Event, Peripherals, PhotoBooth, State};
