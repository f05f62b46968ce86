//! Built-in shader sources.

/// Maps the unit-square quad onto clip space and forwards `tcoord`.
pub const PASSTHROUGH_VERTEX: &str = r"attribute vec4 vertex;
varying vec2 tcoord;

void main(void)
{
    tcoord = vertex.xy;
    gl_Position = vec4(vertex.xy * 2.0 - 1.0, 0.0, 1.0);
}
";

/// Copies the source texel under `tcoord`.
pub const IDENTITY_FRAGMENT: &str = r"precision mediump float;
varying vec2 tcoord;
uniform sampler2D tex;
uniform vec2 texelsize;

void main(void)
{
    gl_FragColor = texture2D(tex, tcoord);
}
";
