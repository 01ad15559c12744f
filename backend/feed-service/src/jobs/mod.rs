pub mod index_warmer;
