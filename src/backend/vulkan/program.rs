//! Shader programs: GLSL compiled to SPIR-V modules through shaderc.

use std::sync::Arc;

use ash::vk;

use crate::error::{vk_err, GpuError, GpuResult};
use crate::types::{ProgramParams, ShaderStage};

use super::device::VkContext;

const ENTRY_POINT: &str = "main";

/// Prefix every line of `source` with its 1-based number.
pub fn numbered_source(source: &str) -> String {
    source
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{:4} {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn shader_kind(stage: ShaderStage) -> shaderc::ShaderKind {
    match stage {
        ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
        ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        ShaderStage::Compute => shaderc::ShaderKind::Compute,
    }
}

fn with_version(source: &str) -> String {
    if source.trim_start().starts_with("#version") {
        source.to_string()
    } else {
        format!("#version 450\n{}", source)
    }
}

/// GLSL to SPIR-V compiler targeting Vulkan 1.1 (SPIR-V 1.3).
pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
}

impl ShaderCompiler {
    pub fn new() -> GpuResult<Self> {
        let compiler = shaderc::Compiler::new()
            .map_err(|e| GpuError::Generic(format!("Failed to create shader compiler: {}", e)))?;
        Ok(Self { compiler })
    }

    fn options() -> Result<shaderc::CompileOptions<'static>, String> {
        let mut options = shaderc::CompileOptions::new().map_err(|e| e.to_string())?;
        options.set_source_language(shaderc::SourceLanguage::GLSL);
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_1 as u32,
        );
        options.set_target_spirv(shaderc::SpirvVersion::V1_3);
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);
        Ok(options)
    }

    /// Compile GLSL `source` for `stage` into SPIR-V words.
    pub fn compile(&self, source: &str, stage: ShaderStage) -> Result<Vec<u32>, String> {
        let source = with_version(source);
        let options = Self::options()?;
        let artifact = self
            .compiler
            .compile_into_spirv(
                &source,
                shader_kind(stage),
                &format!("{:?}", stage).to_lowercase(),
                ENTRY_POINT,
                Some(&options),
            )
            .map_err(|e| e.to_string())?;
        if artifact.get_num_warnings() > 0 {
            log::warn!("{:?} shader warnings:\n{}", stage, artifact.get_warning_messages());
        }
        Ok(artifact.as_binary().to_vec())
    }
}

/// The compiled stages of one program.
pub struct Program {
    ctx: Arc<VkContext>,
    label: Option<String>,
    modules: [vk::ShaderModule; 3],
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("label", &self.label)
            .field("modules", &self.modules)
            .finish()
    }
}

fn stage_slot(stage: ShaderStage) -> usize {
    match stage {
        ShaderStage::Vertex => 0,
        ShaderStage::Fragment => 1,
        ShaderStage::Compute => 2,
    }
}

impl Program {
    pub fn new(
        ctx: &Arc<VkContext>,
        compiler: &ShaderCompiler,
        params: &ProgramParams,
    ) -> GpuResult<Self> {
        let sources = [
            (ShaderStage::Vertex, params.vertex.as_deref()),
            (ShaderStage::Fragment, params.fragment.as_deref()),
            (ShaderStage::Compute, params.compute.as_deref()),
        ];
        if sources.iter().all(|(_, source)| source.is_none()) {
            return Err(GpuError::InvalidArg("program has no shader stage".to_string()));
        }

        let mut program = Self {
            ctx: Arc::clone(ctx),
            label: params.label.clone(),
            modules: [vk::ShaderModule::null(); 3],
        };

        for (stage, source) in sources {
            let Some(source) = source else {
                continue;
            };
            program.modules[stage_slot(stage)] = program.create_module(compiler, stage, source)?;
        }

        Ok(program)
    }

    fn create_module(
        &self,
        compiler: &ShaderCompiler,
        stage: ShaderStage,
        source: &str,
    ) -> GpuResult<vk::ShaderModule> {
        let code = compiler.compile(source, stage).map_err(|message| {
            log::error!(
                "Failed to compile {:?} shader of {}:\n{}\n{}",
                stage,
                self.label.as_deref().unwrap_or("program"),
                numbered_source(source),
                message
            );
            GpuError::Generic(format!("{:?} shader compilation failed: {}", stage, message))
        })?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        unsafe { self.ctx.device().create_shader_module(&create_info, None) }
            .map_err(vk_err("create shader module"))
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Module of `stage`, if the program has that stage.
    pub fn module(&self, stage: ShaderStage) -> Option<vk::ShaderModule> {
        let module = self.modules[stage_slot(stage)];
        (module != vk::ShaderModule::null()).then_some(module)
    }

    pub fn entry_point(&self) -> &'static std::ffi::CStr {
        c"main"
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        for module in self.modules {
            if module != vk::ShaderModule::null() {
                unsafe { self.ctx.device().destroy_shader_module(module, None) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_source() {
        let numbered = numbered_source("void main()\n{\n}");
        assert_eq!(numbered, "   1 void main()\n   2 {\n   3 }");
    }

    #[test]
    fn test_version_is_prepended_once() {
        assert!(with_version("void main() {}").starts_with("#version 450\n"));
        let explicit = "#version 460\nvoid main() {}";
        assert_eq!(with_version(explicit), explicit);
    }

    #[test]
    fn test_compile_compute_shader() {
        let compiler = ShaderCompiler::new().unwrap();
        let source = r#"
            layout(local_size_x = 1) in;
            layout(std430, set = 0, binding = 0) buffer Data { uint values[4]; };
            void main() { values[0] = 1u; }
        "#;
        let spirv = compiler.compile(source, ShaderStage::Compute).unwrap();
        assert_eq!(spirv[0], 0x0723_0203);
        // SPIR-V 1.3 header version word.
        assert_eq!(spirv[1], 0x0001_0300);
    }

    #[test]
    fn test_compile_combined_image_sampler() {
        let compiler = ShaderCompiler::new().unwrap();
        let source = r#"
            layout(set = 0, binding = 0) uniform sampler2D tex;
            layout(location = 0) in vec2 uv;
            layout(location = 0) out vec4 color;
            void main() { color = texture(tex, uv); }
        "#;
        let spirv = compiler.compile(source, ShaderStage::Fragment);
        assert!(spirv.is_ok(), "{:?}", spirv.err());
    }

    #[test]
    fn test_compile_error_is_reported() {
        let compiler = ShaderCompiler::new().unwrap();
        let result = compiler.compile("void main() { undeclared = 1; }", ShaderStage::Fragment);
        let message = result.unwrap_err();
        assert!(message.contains("undeclared"), "{}", message);
    }
}
