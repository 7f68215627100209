pub mod reducer;
pub mod session;
