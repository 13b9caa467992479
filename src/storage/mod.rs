pub mod database;
pub mod vector_index;
