mod helpers;
mod poll_tests;
