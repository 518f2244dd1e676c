use std::borrow::Cow;

use handoff::ColorPass;
use wgpu::naga::ShaderStage;

/// Compiles the static full-screen triangle vertex shader.
pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("fullscreen triangle vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    })
}

/// Compiles the present fragment shader specialised for `pass`.
pub(crate) fn compile_present_shader(device: &wgpu::Device, pass: ColorPass) -> wgpu::ShaderModule {
    let (label, define) = pass_define(pass);
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(PRESENT_SHADER_GLSL),
            stage: ShaderStage::Fragment,
            defines: &[(define, "1")],
        },
    })
}

fn pass_define(pass: ColorPass) -> (&'static str, &'static str) {
    match pass {
        ColorPass::Blit => ("present blit fragment", "PRESENT_BLIT"),
        ColorPass::Linearize => ("present linearize fragment", "PRESENT_LINEARIZE"),
        ColorPass::Encode => ("present encode fragment", "PRESENT_ENCODE"),
    }
}

/// Full-screen triangle with top-left texture coordinates.
const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    vec2 pos = positions[uint(gl_VertexIndex)];
    v_uv = vec2(pos.x * 0.5 + 0.5, 0.5 - pos.y * 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

/// Samples the browser surface and writes premultiplied color.
///
/// The uniform block layout must match `PresentUniforms` in `pipeline.rs`.
/// Transfer functions mirror `handoff::srgb_to_linear` and
/// `handoff::linear_to_srgb`.
const PRESENT_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 outColor;

layout(set = 0, binding = 0) uniform texture2D browser_texture;
layout(set = 0, binding = 1) uniform sampler browser_sampler;
layout(std140, set = 0, binding = 2) uniform PresentParams {
    uint flip_y;
    uint _padding0;
    uint _padding1;
    uint _padding2;
} params;

float to_linear(float c) {
    return c <= 0.04045 ? c / 12.92 : pow((c + 0.055) / 1.055, 2.4);
}

float to_srgb(float c) {
    return c <= 0.0031308 ? c * 12.92 : 1.055 * pow(c, 1.0 / 2.4) - 0.055;
}

vec3 to_linear3(vec3 c) {
    return vec3(to_linear(c.r), to_linear(c.g), to_linear(c.b));
}

vec3 to_srgb3(vec3 c) {
    return vec3(to_srgb(c.r), to_srgb(c.g), to_srgb(c.b));
}

void main() {
    vec2 uv = v_uv;
    if (params.flip_y != 0u) {
        uv.y = 1.0 - uv.y;
    }
    vec4 texel = texture(sampler2D(browser_texture, browser_sampler), uv);

#if defined(PRESENT_LINEARIZE) || defined(PRESENT_ENCODE)
    // Transfer functions apply to straight color; alpha is reapplied after.
    vec3 straight = texel.a > 0.0 ? texel.rgb / texel.a : vec3(0.0);
#if defined(PRESENT_LINEARIZE)
    texel.rgb = to_linear3(straight) * texel.a;
#else
    texel.rgb = to_srgb3(straight) * texel.a;
#endif
#endif

    outColor = texel;
}
";
