//! Default repository files added when the model omits them.

use chrono::{Datelike, Utc};

pub const LICENSE_PATH: &str = "LICENSE";
pub const README_PATH: &str = "README.md";

/// Standard MIT license text for the current year.
pub fn mit_license() -> String {
    format!(
        r#"MIT License

Copyright (c) {}

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE."#,
        Utc::now().year()
    )
}

/// README describing the generated application.
pub fn default_readme(task: &str, brief: &str) -> String {
    format!(
        r#"# {task}

## Summary
This application was generated automatically to fulfill the task brief.

**Brief**: {brief}

## Setup & Usage
This is a static web application deployed on GitHub Pages.

1. Visit the GitHub Pages URL
2. The application loads automatically
3. Follow the on-screen instructions

## Code Explanation
The application is a single page built with HTML, CSS and JavaScript.
All functionality lives in `index.html`.

## License
This project is licensed under the MIT License - see the LICENSE file for details.
"#
    )
}
