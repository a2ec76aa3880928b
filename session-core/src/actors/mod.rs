pub mod desktop;

pub use desktop::{DesktopActor, DesktopArguments, DesktopError, DesktopMsg};
