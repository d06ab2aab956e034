use std::io::{self, Write};

use dfu::{DfuError, Progress};

const BAR_WIDTH: usize = 60;

/// Single-line progress bar on stdout
#[derive(Default)]
pub(crate) struct ProgressBar;

impl ProgressBar {
    fn draw(completed: usize, total: usize) {
        let (percentage, filled) = if total == 0 {
            (100, BAR_WIDTH)
        } else {
            ((100 * completed) / total, (BAR_WIDTH * completed) / total)
        };
        print!(
            "\r  Flashing {:3}% [{}]",
            percentage,
            "#".repeat(filled) + &" ".repeat(BAR_WIDTH - filled)
        );
        let _ = io::stdout().flush();
    }
}

impl Progress for ProgressBar {
    fn started(&mut self, total_blocks: usize) {
        println!("  Writing {total_blocks} blocks");
        Self::draw(0, total_blocks);
    }

    fn block_written(&mut self, completed: usize, total_blocks: usize) {
        Self::draw(completed, total_blocks);
    }

    fn finished(&mut self, result: Result<(), &DfuError>) {
        match result {
            Ok(()) => println!(" ✅"),
            Err(_) => println!(" ❌"),
        }
    }
}

