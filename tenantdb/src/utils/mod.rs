pub mod logging;
pub mod naming;
pub mod retry;
