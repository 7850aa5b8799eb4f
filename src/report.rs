//! Test reporting and output generation.
//!
//! This module provides utilities for test result reporting including
//! JUnit XML generation and console output formatting.

pub mod junit;

pub use junit::JUnitListener;

use crate::listener::RunSummary;

/// Prints a summary of test results to the console.
///
/// Displays pass/fail counts with colored output and appropriate
/// status messages based on the results.
pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("Test Results:");
    println!("  Total:   {}", summary.total);
    println!("  Passed:  {}", console::style(summary.passed).green());
    println!("  Failed:  {}", console::style(summary.failed).red());

    if summary.errors > 0 {
        println!("  Errors:  {}", console::style(summary.errors).red().bold());
    }

    println!("  Skipped: {}", console::style(summary.skipped).yellow());
    println!("  Duration: {:?}", summary.duration);

    println!();
    if summary.total == 0 {
        println!("{}", console::style("No tests were run.").yellow().bold());
    } else if summary.success() {
        println!("{}", console::style("All tests passed!").green().bold());
    } else {
        println!("{}", console::style("Some tests failed.").red().bold());
    }
}
