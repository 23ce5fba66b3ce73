//! Backend selection: decide whether a script should run through the
//! headless subprocess instead of the live Blender socket.
//!
//! Intentionally conservative. A false negative only routes rendering code
//! through the slower socket path; it never produces a wrong result.

/// Call-site patterns that mark a script as rendering code. Matched
/// case-insensitively as plain substrings.
const RENDERING_PATTERNS: &[&str] = &[
    "render_scene(",
    "bpy.ops.render.render",
    "bpy.context.scene.render.filepath",
    "bpy.ops.render.render(",
    "render.render(",
    "bpy.context.scene.render.engine",
    "bpy.context.scene.render.resolution",
];

/// Content heuristic over the script text.
pub fn is_rendering_code(code: &str) -> bool {
    if code.is_empty() {
        return false;
    }
    let lower = code.to_lowercase();
    RENDERING_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Decision table: config toggle, then instruction flag, then heuristic.
pub fn should_use_headless(code: &str, expects_render: bool, headless_enabled: bool) -> bool {
    if !headless_enabled {
        return false;
    }
    expects_render || is_rendering_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_wins_over_everything() {
        assert!(!should_use_headless("render_scene()", true, false));
        assert!(!should_use_headless("bpy.ops.render.render()", false, false));
    }

    #[test]
    fn explicit_render_flag_selects_headless() {
        assert!(should_use_headless("print('hi')", true, true));
    }

    #[test]
    fn heuristic_matches_known_patterns_case_insensitively() {
        assert!(should_use_headless("RENDER_SCENE(quality=90)", false, true));
        assert!(should_use_headless(
            "import bpy\nbpy.ops.render.render(write_still=True)",
            false,
            true
        ));
        assert!(should_use_headless(
            "bpy.context.scene.render.engine = 'CYCLES'",
            false,
            true
        ));
    }

    #[test]
    fn plain_code_stays_on_socket() {
        assert!(!should_use_headless("print('hello')", false, true));
        assert!(!should_use_headless("", false, true));
        assert!(!should_use_headless(
            "bpy.ops.mesh.primitive_cube_add()",
            false,
            true
        ));
    }
}
