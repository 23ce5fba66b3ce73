//! Script shaping before execution: force render output into the local
//! session directory and prepend the resolution-scaling preamble.

use regex::Regex;

/// Placeholder the server embeds in generated scripts for the client-local
/// output directory.
pub const OUTPUT_DIR_PLACEHOLDER: &str = "__LL3M_OUTPUT_DIR__";

/// Rewrite a script so generated artifacts land in `out_dir`.
///
/// When the placeholder is present only its occurrences are substituted.
/// Otherwise every `render_scene(...)` call site is rewritten to carry
/// `output_path='<out_dir>'`, replacing any output path the server supplied
/// and preserving the remaining arguments. Function definitions are left
/// untouched.
pub fn rewrite_output_path(code: &str, out_dir: &str) -> String {
    let out_dir_norm = out_dir.replace('\\', "/");

    if code.contains(OUTPUT_DIR_PLACEHOLDER) {
        return code.replace(OUTPUT_DIR_PLACEHOLDER, &out_dir_norm);
    }

    // No lookbehind in the regex crate: capture an optional `def` prefix and
    // pass definitions through unchanged.
    let call_re = Regex::new(r"(?s)(def\s+)?render_scene\(([^)]*)\)")
        .expect("render_scene call pattern is valid");
    let out_arg_re = Regex::new(r#"output_path\s*=\s*(['"][^'"]*['"])\s*,?"#)
        .expect("output_path argument pattern is valid");

    call_re
        .replace_all(code, |caps: &regex::Captures| {
            if caps.get(1).is_some() {
                return caps[0].to_string();
            }
            let args = out_arg_re.replace_all(&caps[2], "");
            let args = args
                .replace(", ,", ",")
                .trim()
                .trim_end_matches(',')
                .trim()
                .to_string();
            if args.is_empty() {
                format!("render_scene(output_path='{out_dir_norm}')")
            } else {
                format!("render_scene({args}, output_path='{out_dir_norm}')")
            }
        })
        .into_owned()
}

/// Build the resolution-scaling preamble for a configured scale.
///
/// Scales outside 0.0..=1.0 (or non-finite) fall back to full resolution;
/// `None` means no preamble at all.
pub fn resolution_preamble(scale: Option<f64>) -> Option<String> {
    let scale = scale?;
    let effective = if scale.is_finite() && (0.0..=1.0).contains(&scale) {
        scale
    } else {
        1.0
    };
    let percent = (effective * 100.0).round() as i64;
    Some(format!(
        "import bpy\nscene = bpy.context.scene\nscene.render.resolution_percentage = {percent}\n"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_occurrences_are_substituted() {
        let code = "render_scene(output_path='__LL3M_OUTPUT_DIR__')\nprint('__LL3M_OUTPUT_DIR__')";
        let out = rewrite_output_path(code, "/out");
        assert!(!out.contains(OUTPUT_DIR_PLACEHOLDER));
        assert_eq!(out.matches("/out").count(), 2);
    }

    #[test]
    fn call_site_gains_output_path_and_keeps_arguments() {
        let out = rewrite_output_path("render_scene(quality=90)", "/out");
        assert!(out.contains("output_path='/out'"));
        assert!(out.contains("quality=90"));
    }

    #[test]
    fn existing_output_path_is_replaced() {
        let out = rewrite_output_path("render_scene(output_path='/tmp/x', quality=90)", "/out");
        assert!(out.contains("output_path='/out'"));
        assert!(!out.contains("/tmp/x"));
        assert!(out.contains("quality=90"));
    }

    #[test]
    fn bare_call_gets_only_output_path() {
        let out = rewrite_output_path("render_scene()", "/out");
        assert_eq!(out, "render_scene(output_path='/out')");
    }

    #[test]
    fn definitions_are_not_rewritten() {
        let code = "def render_scene(output_path=None):\n    pass\nrender_scene()";
        let out = rewrite_output_path(code, "/out");
        assert!(out.contains("def render_scene(output_path=None)"));
        assert!(out.contains("render_scene(output_path='/out')"));
    }

    #[test]
    fn windows_separators_are_normalized() {
        let out = rewrite_output_path("render_scene()", r"C:\sessions\img");
        assert!(out.contains("output_path='C:/sessions/img'"));
    }

    #[test]
    fn preamble_clamps_invalid_scale() {
        assert!(resolution_preamble(None).is_none());
        let p = resolution_preamble(Some(0.5)).unwrap();
        assert!(p.contains("resolution_percentage = 50"));
        let p = resolution_preamble(Some(7.0)).unwrap();
        assert!(p.contains("resolution_percentage = 100"));
        let p = resolution_preamble(Some(f64::NAN)).unwrap();
        assert!(p.contains("resolution_percentage = 100"));
    }
}
