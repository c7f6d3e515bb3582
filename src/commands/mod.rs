pub type CmdResult<T> = greenlight::Result<(T, i32)>;

pub mod cache;
pub mod plan;
pub mod run;
pub mod validate;
