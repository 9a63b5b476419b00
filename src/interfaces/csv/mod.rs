pub mod deal_writer;
