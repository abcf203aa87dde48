//! Test fixtures for common test scenarios.
//!
//! The terminal project mirrors a typical vendored layout: a base utility
//! library, a formatting library, a generated OpenGL loader, and the final
//! executable.

use std::path::Path;

/// Kiln.toml for the terminal project.
pub const TERMINAL_MANIFEST: &str = r#"[project]
name = "uterm"

[toolchain]
std = "c++11"
includes = ["deps/abseil"]

[[rule]]
when = ["clang"]
macros = ["__CLANG_SUPPORT_DYN_ANNOTATION__"]

[[generate]]
name = "gl3w"
program = ["python3", "python2", "python"]
args = ["deps/gl3w/gl3w_gen.py", "--root", "{out}"]
inputs = ["deps/gl3w/gl3w_gen.py"]
outputs = ["include/GL/gl3w.h", "include/GL/glcorearb.h", "src/gl3w.c"]
sources = ["src/gl3w.c"]
includes = ["include"]

[[lib]]
name = "abseil_base"
sources = [{ prefix = "deps/abseil/absl", glob = ["base/*.cc", "base/internal/*.cc"], ignore = "_test" }]
include-source-dirs = false
export-includes = ["deps/abseil"]

[[lib]]
name = "fmt"
sources = ["deps/fmt/src/*.cc"]
export-includes = ["deps/fmt/include"]

[[lib]]
name = "gl3w_lib"
deps = ["gl3w"]

[[exe]]
name = "uterm"
sources = ["src/*.cc"]
deps = ["abseil_base", "fmt", "gl3w_lib"]
external-libs = ["glfw", "GL"]
link-flags = ["-fuse-ld=lld"]
"#;

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// Lay out the terminal project, manifest included, under `root`.
pub fn write_terminal_project(root: &Path) {
    write_file(root, "Kiln.toml", TERMINAL_MANIFEST);
    write_file(root, "deps/abseil/absl/base/log.cc", "int absl_log;\n");
    write_file(root, "deps/abseil/absl/base/log_test.cc", "int absl_log_test;\n");
    write_file(
        root,
        "deps/abseil/absl/base/internal/spinlock.cc",
        "int absl_spinlock;\n",
    );
    write_file(root, "deps/fmt/src/format.cc", "int fmt_format;\n");
    write_file(root, "deps/fmt/include/fmt/format.h", "#pragma once\n");
    write_file(root, "deps/gl3w/gl3w_gen.py", "print('gl3w')\n");
    write_file(root, "src/main.cc", "int main() { return 0; }\n");
}
