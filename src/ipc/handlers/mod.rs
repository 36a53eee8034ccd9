pub mod attendance;
pub mod bathroom;
pub mod core;
pub mod exams;
pub mod monitor;
pub mod profiles;
pub mod roster;
pub mod watch;
