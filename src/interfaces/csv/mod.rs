pub mod receipt_writer;
