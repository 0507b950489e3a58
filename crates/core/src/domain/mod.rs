pub mod decision;
pub mod event;
pub mod state;
