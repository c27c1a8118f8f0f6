//! Terminal front end: the serial port picker and the pose view.

mod device_selector;
mod error;
mod pose_view;

pub use device_selector::device_selector;
pub use error::GuiError;
pub use pose_view::{draw_pose, PoseView, RenderSurface};
