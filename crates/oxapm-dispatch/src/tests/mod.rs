
mod enrich;
mod handler;
