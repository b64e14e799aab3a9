mod common;
mod dev_server;
mod lifecycle;
mod reload;
