use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Parameter {
    Positional(String),
    Named(String, String),
}

/// A MediaWiki template call, optionally substituted (`{{subst:...}}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    subst: bool,
    parameters: Vec<Parameter>,
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subst: false,
            parameters: Vec::new(),
        }
    }

    pub fn subst(name: impl Into<String>) -> Self {
        Self {
            subst: true,
            ..Self::new(name)
        }
    }

    /// Setting an existing name replaces its value in place.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.add_parameter(name, value);
        self
    }

    pub fn positional(mut self, value: impl ToString) -> Self {
        self.parameters.push(Parameter::Positional(value.to_string()));
        self
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl ToString) {
        let name = name.into();
        let value = value.to_string();
        for parameter in &mut self.parameters {
            if let Parameter::Named(existing, slot) = parameter
                && *existing == name
            {
                *slot = value;
                return;
            }
        }
        self.parameters.push(Parameter::Named(name, value));
    }

    /// One parameter per line, closing braces on their own line.
    pub fn multiline(&self) -> String {
        if self.parameters.is_empty() {
            return self.to_string();
        }
        let mut output = format!("{{{{{}", self.head());
        for parameter in &self.parameters {
            match parameter {
                Parameter::Positional(value) => output.push_str(&format!("\n| {value}")),
                Parameter::Named(name, value) => {
                    output.push_str(&format!("\n| {name} = {value}"))
                }
            }
        }
        output.push_str("\n}}");
        output
    }

    fn head(&self) -> String {
        if self.subst {
            format!("subst:{}", self.name)
        } else {
            self.name.clone()
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{{}", self.head())?;
        for parameter in &self.parameters {
            match parameter {
                Parameter::Positional(value) => write!(f, "|{value}")?,
                Parameter::Named(name, value) => write!(f, "|{name}={value}")?,
            }
        }
        write!(f, "}}}}")
    }
}
