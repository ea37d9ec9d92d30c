// Build script to compile GLSL shaders to SPIR-V
//
// Output goes to resources/shader/<stage>.spv, the default shader_dir the
// renderer loads "vert" and "frag" from.

use std::path::Path;
use std::process::Command;

const OUT_DIR: &str = "resources/shader";

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    if let Err(e) = std::fs::create_dir_all(OUT_DIR) {
        println!("cargo:warning=Could not create {}: {}", OUT_DIR, e);
        return;
    }

    // Compile shaders using glslc (part of Vulkan SDK)
    compile_shader("shaders/triangle.vert", "vert");
    compile_shader("shaders/triangle.frag", "frag");
}

fn compile_shader(input: &str, name: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(OUT_DIR).join(format!("{}.spv", name));

    // Check if glslc is available
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(&output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), shaders were not compiled", e);
            println!(
                "cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}",
                input,
                output_path.display()
            );
        }
    }
}
