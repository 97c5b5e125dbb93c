mod buffer;
mod config;
mod program;
