pub mod centurion_test;
pub mod health;
pub mod middleware;
pub mod ready;
