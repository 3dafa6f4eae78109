pub mod ai;
pub mod board;
pub mod clock;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod match_result;
pub mod modes;
pub mod snapshot;
pub mod state;
pub mod systems;
pub mod turn_order;
