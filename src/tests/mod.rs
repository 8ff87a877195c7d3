// Test modules for edu-chat
// Each module holds the unit tests of the corresponding source file

mod helpers;
mod session_tests;
