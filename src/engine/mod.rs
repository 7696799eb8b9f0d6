pub mod broadcast;
pub mod fare;
pub mod lifecycle;
pub mod matching;
pub mod refresher;
pub mod routing;
pub mod scheduler;
