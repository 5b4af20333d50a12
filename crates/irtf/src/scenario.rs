use std::cell::OnceCell;

/// A named set of extra VM flags the whole test class is run with.
#[derive(Debug, Clone)]
pub struct Scenario {
    index: u32,
    flags: Vec<String>,
    enabled: bool,
    captured_output: OnceCell<String>,
}

impl Scenario {
    pub fn new<I, S>(index: u32, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            index,
            flags: flags.into_iter().map(Into::into).collect(),
            enabled: true,
            captured_output: OnceCell::new(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Combined output of this scenario's last test VM run.
    pub fn test_vm_output(&self) -> Option<&str> {
        self.captured_output.get().map(String::as_str)
    }

    /// Returns false if output was already recorded for the current run.
    pub(crate) fn record_output(&self, output: String) -> bool {
        self.captured_output.set(output).is_ok()
    }

    pub(crate) fn reset_output(&mut self) {
        self.captured_output.take();
    }

    /// `Scenario #N` followed by an underline and the flag list.
    pub fn title_and_flags(&self) -> String {
        let title = format!("Scenario #{}", self.index);
        format!(
            "{title}\n{}\nScenario flags: [{}]\n",
            "=".repeat(title.len()),
            self.flags.join(", ")
        )
    }
}
