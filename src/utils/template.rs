//! String template rendering utilities.
//!
//! Placeholders use `{{key}}` syntax. Unknown placeholders are left as-is.

pub fn render(template: &str, variables: &[(&str, String)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}
