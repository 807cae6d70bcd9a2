mod checkpoint_test;
mod load_test;
mod schema_change_test;
mod validation_test;
