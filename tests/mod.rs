mod support;

mod queue_tests;
mod retry_tests;
