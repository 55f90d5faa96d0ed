pub mod bvalue;
