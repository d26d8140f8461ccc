mod common;
mod job_queue_tests;
mod store_tests;
