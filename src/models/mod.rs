pub mod forms;
pub mod responses;
pub mod state;
pub mod wizard;
