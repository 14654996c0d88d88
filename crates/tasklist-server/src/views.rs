//! HTML rendering. Templates are compiled into the binary; names ending in
//! `.html` are auto-escaped.

use chrono::DateTime;
use minijinja::{context, Environment};
use tasklist_core::Task;

use crate::error::ErrorPage;

const TEMPLATES: &[(&str, &str)] = &[
    ("layout.html", include_str!("../templates/layout.html")),
    ("landing.html", include_str!("../templates/landing.html")),
    ("error.html", include_str!("../templates/error.html")),
    ("tasks/index.html", include_str!("../templates/tasks/index.html")),
    ("tasks/new.html", include_str!("../templates/tasks/new.html")),
    ("tasks/show.html", include_str!("../templates/tasks/show.html")),
    ("tasks/edit.html", include_str!("../templates/tasks/edit.html")),
];

pub struct Views {
    env: Environment<'static>,
}

impl Views {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        env.add_filter("datetime", datetime);
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(ctx)
    }

    pub fn landing(&self) -> Result<String, minijinja::Error> {
        self.render("landing.html", context! {})
    }

    pub fn task_list(&self, tasks: &[Task]) -> Result<String, minijinja::Error> {
        let open = tasks.iter().filter(|t| !t.completed).count();
        self.render("tasks/index.html", context! { tasks, open })
    }

    pub fn new_task(&self) -> Result<String, minijinja::Error> {
        self.render("tasks/new.html", context! {})
    }

    pub fn task_detail(&self, task: &Task) -> Result<String, minijinja::Error> {
        self.render("tasks/show.html", context! { task })
    }

    pub fn edit_task(&self, task: &Task) -> Result<String, minijinja::Error> {
        self.render("tasks/edit.html", context! { task })
    }

    pub fn error(&self, page: &ErrorPage) -> Result<String, minijinja::Error> {
        self.render(
            "error.html",
            context! {
                status => page.status.as_u16(),
                reason => page.status.canonical_reason().unwrap_or("Error"),
                message => &page.message,
            },
        )
    }
}

/// `{{ task.createdAt | datetime }}` renders an RFC 3339 string as e.g.
/// `Apr 19, 2017 01:55 UTC`. Unparseable input is shown unchanged.
fn datetime(value: &str) -> String {
    match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => ts.format("%b %-d, %Y %H:%M UTC").to_string(),
        Err(_) => value.to_owned(),
    }
}
