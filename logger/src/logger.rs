//! Background, channel-backed logger: callers hand off a formatted line and
//! a dedicated writer thread appends it to the log file, so logging never
//! blocks the caller on file I/O.
use chrono;
use std::{
    fmt::Display,
    fs::OpenOptions,
    io::Write,
    sync::mpsc::{Receiver, Sender, channel},
    thread::spawn,
};
/// Struct to hold the logger sender
#[derive(Debug, Clone)]
pub struct Logger {
    /// Sender to send log messages
    pub logger: Sender<String>,
}

impl Logger {
    /// Spawns the writer thread and returns a handle to it.
    /// # Parameters
    /// * `filename`: path of the file log lines are appended to
    pub fn new(filename: &str) -> Logger {
        let (logger, receiver) = channel();
        let filename = filename.to_string();

        spawn(move || {
            write_to_file(&filename, receiver);
        });

        Logger { logger }
    }

    pub fn null() -> Self {
        let (sender, receiver) = channel::<String>();
        spawn(move || for _ in receiver {});
        Self { logger: sender }
    }

    /// Logs an info-level message.
    /// # Parameters
    /// * `message`: text to record
    /// * `module`: logical unit of the program emitting it
    pub fn info(&self, message: &str, module: &str) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let log_message = format!("[INFO] - {timestamp} - {module}: {message}");
        self.log(log_message.as_str());
    }

    /// Logs an error-level message.
    /// # Parameters
    /// * `message`: text to record
    /// * `module`: logical unit of the program where the error occurred
    pub fn error(&self, message: &str, module: &str) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let log_message = format!("[ERROR] - {timestamp} - {module}: {message}");
        self.log(log_message.as_str());
    }

    /// Logs a warning-level message.
    /// # Parameters
    /// * `message`: text to record
    /// * `module`: logical unit of the program emitting it
    pub fn warn(&self, message: &str, module: &str) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let log_message = format!("[WARNING] - {timestamp} - {module}: {message}");
        self.log(log_message.as_str());
    }

    /// Logs a debug-level message with an attached value.
    /// # Parameters
    /// * `message`: text to record
    /// * `module`: logical unit of the program emitting it
    /// * `data`: extra context for this particular case
    pub fn debug<T: Display>(&self, message: &str, module: &str, data: T) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let log_message = format!("[DEBUG] - {timestamp} - {module}: {message} - {data}");
        self.log(log_message.as_str());
    }

    /// Sends a formatted line over the logger's channel.
    /// # Parameters
    /// * `message`: text to record
    fn log(&self, log_message: &str) {
        match self.logger.send(log_message.to_string()) {
            Ok(_) => {}
            Err(_) => {
                eprintln!("Error sending log message");
            }
        }
    }
}

/// Receives messages and appends them to the named file.
///
/// # Parameters
/// * `filename`: path of the file to create/append to
/// * `receiver`: the channel's receiving end, shared with the struct that
///   owns the sender
fn write_to_file(filename: &str, receiver: Receiver<String>) {
    let file = OpenOptions::new().create(true).append(true).open(filename);

    let mut file = match file {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error opening log file: {e}");
            return;
        }
    };

    for message in receiver {
        if let Err(e) = writeln!(file, "{message}") {
            eprintln!("Error writing to log file: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use core::time;
    use std::{fs::remove_file, io::BufRead, thread::sleep};

    struct PersonTest {
        pub name: String,
        pub age: u32,
    }

    impl std::fmt::Display for PersonTest {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "Name: {}, Age: {}", self.name, self.age)
        }
    }

    #[test]
    fn test_logger() {
        let logger = super::Logger::new("test.log");

        logger.info("This is an info message", "test_module");
        sleep(time::Duration::from_millis(100));
        logger.error("This is an error message", "test_module");
        sleep(time::Duration::from_millis(100));
        logger.debug("This is a debug message", "test_module", 42);
        sleep(time::Duration::from_millis(100));

        let file = std::fs::File::open("test.log").unwrap();
        let reader = std::io::BufReader::new(file);
        let lines: Vec<String> = reader.lines().map_while(Result::ok).collect();
        for line in lines {
            println!("{line}");
            assert!(
                line.contains("[INFO]") || line.contains("[ERROR]") || line.contains("[DEBUG]")
            );
        }
        remove_file("test.log").unwrap_or_default();
    }

    #[test]
    fn test_debug_with_struct() {
        let logger = super::Logger::new("test_struct.log");

        let person = PersonTest {
            name: "Tommy".to_string(),
            age: 26,
        };

        logger.debug("This is a debug message with struct", "test_module", person);
        sleep(time::Duration::from_millis(100));

        let file = std::fs::File::open("test_struct.log").unwrap();
        let reader = std::io::BufReader::new(file);
        let lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

        for line in lines {
            assert!(line.contains("[DEBUG]"));
            assert!(line.contains("Name: Tommy"));
            assert!(line.contains("Age: 26"));
        }
        remove_file("test_struct.log").unwrap_or_default();
    }
}
