use std::{panic, process, thread};

use log::error;

/// Makes a panic in any worker thread take the whole process down instead
/// of leaving the remaining workers waiting for it.
pub fn init() {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        let current = thread::current();
        let name = current.name().unwrap_or("<unnamed>");
        error!(thread = name; "{info}");

        default_hook(info);
        process::exit(1);
    }));
}
