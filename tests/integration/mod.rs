pub mod test_utils;

mod restore_flow;
