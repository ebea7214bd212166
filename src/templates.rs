use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tera::Tera;

static TERA: OnceLock<Tera> = OnceLock::new();

/// Templates compiled into the binary. A templates directory may override any of them by name.
const BUILTIN: &[(&str, &str)] = &[
    ("index.html", include_str!("../templates/index.html")),
    ("submission.html", include_str!("../templates/submission.html")),
    ("mail/send_to_internal.txt", include_str!("../templates/mail/send_to_internal.txt")),
    ("mail/send_to_external.txt", include_str!("../templates/mail/send_to_external.txt")),
    ("mail/skip_review.txt", include_str!("../templates/mail/skip_review.txt")),
    ("mail/accept.txt", include_str!("../templates/mail/accept.txt")),
    ("mail/revisions.txt", include_str!("../templates/mail/revisions.txt")),
    ("mail/resubmit.txt", include_str!("../templates/mail/resubmit.txt")),
    ("mail/decline.txt", include_str!("../templates/mail/decline.txt")),
    ("mail/initial_decline.txt", include_str!("../templates/mail/initial_decline.txt")),
    ("mail/new_round.txt", include_str!("../templates/mail/new_round.txt")),
    ("mail/revert_decline.txt", include_str!("../templates/mail/revert_decline.txt")),
    ("mail/revert_initial_decline.txt", include_str!("../templates/mail/revert_initial_decline.txt")),
    ("mail/send_to_production.txt", include_str!("../templates/mail/send_to_production.txt")),
    ("mail/back_from_production.txt", include_str!("../templates/mail/back_from_production.txt")),
    ("mail/back_from_copyediting.txt", include_str!("../templates/mail/back_from_copyediting.txt")),
    ("mail/cancel_review_round.txt", include_str!("../templates/mail/cancel_review_round.txt")),
    ("mail/notify_reviewers.txt", include_str!("../templates/mail/notify_reviewers.txt")),
    ("mail/review_cancel.txt", include_str!("../templates/mail/review_cancel.txt")),
    ("mail/recommendation.txt", include_str!("../templates/mail/recommendation.txt")),
];

/// Load built-in templates plus overrides from `dir`. Only the first call takes effect.
pub fn init(dir: Option<&Path>) -> Result<&'static Tera, tera::Error> {
    if let Some(tera) = TERA.get() {
        return Ok(tera);
    }
    let tera = build(dir)?;
    Ok(TERA.get_or_init(|| tera))
}

pub fn get_tera() -> &'static Tera {
    TERA.get_or_init(|| {
        build(None).unwrap_or_else(|e| {
            tracing::error!("Failed to load built-in templates: {}", e);
            Tera::default()
        })
    })
}

fn build(dir: Option<&Path>) -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![".html"]);
    tera.add_raw_templates(BUILTIN.iter().copied())?;

    if let Some(dir) = dir.filter(|d| d.exists()) {
        let mut files = Vec::new();
        collect_template_files(dir, dir, &mut files)?;
        tracing::info!("Loaded {} template overrides from {}", files.len(), dir.display());
        tera.add_template_files(files)?;
    }
    Ok(tera)
}

fn collect_template_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(PathBuf, Option<String>)>,
) -> Result<(), tera::Error> {
    let entries = std::fs::read_dir(dir).map_err(|e| tera::Error::msg(e.to_string()))?;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() {
            collect_template_files(root, &path, out)?;
            continue;
        }
        let is_template = path
            .extension()
            .map_or(false, |ext| ext == "html" || ext == "txt");
        if !is_template {
            continue;
        }
        let name = path
            .strip_prefix(root)
            .ok()
            .and_then(|p| p.to_str())
            .map(|p| p.replace('\\', "/"));
        out.push((path, name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_parse() {
        let tera = build(None).unwrap();
        for (name, _) in BUILTIN {
            assert!(tera.get_template_names().any(|n| n == *name), "{name}");
        }
    }

    #[test]
    fn directory_overrides_builtins() {
        let dir = std::env::temp_dir().join(format!("ew-templates-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("mail")).unwrap();
        std::fs::write(dir.join("mail/accept.txt"), "Accepted: {{ submission_title }}").unwrap();

        let tera = build(Some(&dir)).unwrap();
        let mut ctx = tera::Context::new();
        ctx.insert("submission_title", "On Rounds");
        assert_eq!(tera.render("mail/accept.txt", &ctx).unwrap(), "Accepted: On Rounds");

        std::fs::remove_dir_all(&dir).ok();
    }
}
