// src/compiler/emitter.rs
// Lowers the analyzed module into PNGB sections. The preamble creates
// resources in dependency-layer order (shaders, then plain resources,
// then layouts, pipelines, and static bind groups), so every id is
// created before any opcode references it. Frame bodies follow, one
// section per `#init`/`#frame`, each closed by SUBMIT. Dynamic bind
// groups are re-created at the head of every frame body that uses them.

use hashbrown::HashMap;

use crate::compiler::analyzer::{DrawCmd, FrameItem, Module};
use crate::pngb::builder::PngbBuilder;
use crate::pngb::descriptor as desc;
use crate::pngb::enums::TextureFormat;
use crate::pngb::opcodes::{FRAME_KIND_FRAME, FRAME_KIND_INIT, Op};
use crate::pngb::{PluginSet, UniformBinding, UniformField};

pub fn emit(module: &Module) -> Result<Vec<u8>, String> {
    let mut b = PngbBuilder::new();

    // -- data section: shader sources first, then #data blobs --
    let shader_data: Vec<u16> = module
        .shaders
        .iter()
        .map(|s| b.add_data(s.code.clone().into_bytes()))
        .collect();
    let blob_data: Vec<u16> = module
        .datas
        .iter()
        .map(|d| b.add_data(d.bytes.clone()))
        .collect();

    // -- preamble: resource creation in topological layer order --
    for (id, _) in module.shaders.iter().enumerate() {
        b.op(&Op::CreateShader {
            id: id as u16,
            source: shader_data[id],
        });
    }

    for (id, t) in module.textures.iter().enumerate() {
        let d = b.add_data(t.desc.encode());
        b.op(&Op::CreateTexture { id: id as u16, desc: d });
        if let Some(blob) = t.data {
            let bpp = texel_size(t.desc.format)
                .ok_or_else(|| format!("texture `{}`: cannot upload to this format", t.name))?;
            let wt = desc::WriteTextureDesc {
                texture: id as u16,
                mip_level: 0,
                origin: [0; 3],
                bytes_per_row: t.desc.width * bpp,
                rows_per_image: t.desc.height,
                width: t.desc.width,
                height: t.desc.height,
                depth: 1,
            };
            let wt_id = b.add_data(wt.encode());
            b.require(PluginSet::UPDATE);
            b.op(&Op::WriteTexture {
                desc: wt_id,
                data: blob_data[blob as usize],
            });
        }
    }

    for (id, s) in module.samplers.iter().enumerate() {
        let d = b.add_data(s.desc.encode());
        b.op(&Op::CreateSampler { id: id as u16, desc: d });
    }

    for (id, buf) in module.buffers.iter().enumerate() {
        b.op(&Op::CreateBuffer {
            id: id as u16,
            size: buf.size,
            usage: buf.usage,
            pool: buf.pool,
        });
        if let Some(blob) = buf.data {
            let data_id = blob_data[blob as usize];
            let len = module.datas[blob as usize].bytes.len() as u32;
            b.require(PluginSet::UPDATE);
            b.op(&Op::WriteBuffer {
                buffer: id as u16,
                offset: 0,
                data: data_id,
                len,
            });
        }
    }

    for (id, v) in module.views.iter().enumerate() {
        let d = b.add_data(v.desc.encode());
        b.op(&Op::CreateTextureView { id: id as u16, desc: d });
    }

    for (id, l) in module.bgls.iter().enumerate() {
        let d = b.add_data(l.desc.encode());
        b.op(&Op::CreateBindGroupLayout { id: id as u16, desc: d });
    }

    for (id, l) in module.pipeline_layouts.iter().enumerate() {
        let d = b.add_data(l.desc.encode());
        b.op(&Op::CreatePipelineLayout { id: id as u16, desc: d });
    }

    for (id, p) in module.render_pipelines.iter().enumerate() {
        let wire = desc::RenderPipelineDesc {
            layout: p.layout,
            vertex_module: p.vertex_module,
            vertex_entry: b.intern(&p.vertex_entry),
            vertex_buffers: p.vertex_buffers.clone(),
            fragment: p.fragment.as_ref().map(|f| desc::FragmentState {
                module: f.module,
                entry_point: b.intern(&f.entry),
                targets: f.targets.clone(),
            }),
            topology: p.topology,
            strip_index_format: p.strip_index_format,
            cull_mode: p.cull_mode,
            front_face: p.front_face,
            depth_stencil: p.depth_stencil,
        };
        let d = b.add_data(wire.encode());
        b.op(&Op::CreateRenderPipeline { id: id as u16, desc: d });
    }

    for (id, p) in module.compute_pipelines.iter().enumerate() {
        let wire = desc::ComputePipelineDesc {
            layout: p.layout,
            module: p.module,
            entry_point: b.intern(&p.entry),
        };
        let d = b.add_data(wire.encode());
        b.op(&Op::CreateComputePipeline { id: id as u16, desc: d });
    }

    for (id, q) in module.query_sets.iter().enumerate() {
        let d = b.add_data(q.desc.encode());
        b.require(PluginSet::QUERY);
        b.op(&Op::CreateQuerySet { id: id as u16, desc: d });
    }

    // static bind groups; dynamic ones are created per frame
    let mut bind_group_data: Vec<Option<u16>> = vec![None; module.bind_groups.len()];
    for (id, bg) in module.bind_groups.iter().enumerate() {
        let wire = desc::BindGroupDesc {
            layout: bg.layout,
            entries: bg.entries.clone(),
        };
        let d = b.add_data(wire.encode());
        bind_group_data[id] = Some(d);
        if !bg.dynamic {
            b.op(&Op::CreateBindGroup { id: id as u16, desc: d });
        }
    }

    // -- frame bodies: #init first, then #frame, declaration order --
    let mut pass_desc: HashMap<u16, u16> = HashMap::new();
    let mut order: Vec<usize> = (0..module.frames.len()).collect();
    order.sort_by_key(|&i| !module.frames[i].init as u8);

    for &fi in &order {
        let frame = &module.frames[fi];
        let name = b.intern(&frame.name);
        b.op(&Op::Frame {
            name,
            kind: if frame.init { FRAME_KIND_INIT } else { FRAME_KIND_FRAME },
        });

        // re-create the dynamic bind groups this frame touches
        let mut dynamic: Vec<u16> = Vec::new();
        for item in &frame.items {
            let groups = match *item {
                FrameItem::Render(id) => &module.render_passes[id as usize].bind_groups,
                FrameItem::Compute(id) => &module.compute_passes[id as usize].bind_groups,
                FrameItem::Queue(_) => continue,
            };
            for &bg in groups {
                if module.bind_groups[bg as usize].dynamic && !dynamic.contains(&bg) {
                    dynamic.push(bg);
                }
            }
        }
        for bg in dynamic {
            b.op(&Op::CreateBindGroup {
                id: bg,
                desc: bind_group_data[bg as usize].expect("bind group descriptors pre-encoded"),
            });
        }

        for item in &frame.items {
            match *item {
                FrameItem::Render(id) => {
                    let pass = &module.render_passes[id as usize];
                    b.require(PluginSet::RENDER);
                    let d = match pass_desc.get(&id) {
                        Some(&d) => d,
                        None => {
                            let d = b.add_data(pass.desc.encode());
                            pass_desc.insert(id, d);
                            d
                        }
                    };
                    b.op(&Op::BeginRenderPass { desc: d });
                    b.op(&Op::SetPipeline { id: pass.pipeline });
                    for (i, &bg) in pass.bind_groups.iter().enumerate() {
                        let slot = module.bind_groups[bg as usize]
                            .explicit_group
                            .unwrap_or(i as u32);
                        b.op(&Op::SetBindGroup {
                            slot,
                            id: bg,
                            dynamic_offsets: Vec::new(),
                        });
                    }
                    for (i, &buf) in pass.vertex_buffers.iter().enumerate() {
                        b.op(&Op::SetVertexBuffer {
                            slot: i as u32,
                            buffer: buf,
                            offset: 0,
                            size: 0,
                        });
                    }
                    if let Some(index_buffer) = pass.index_buffer {
                        b.op(&Op::SetIndexBuffer {
                            buffer: index_buffer,
                            format: pass.index_format,
                            offset: 0,
                        });
                    }
                    match pass.draw {
                        Some(DrawCmd::Draw {
                            vertices,
                            instances,
                            first_vertex,
                            first_instance,
                        }) => b.op(&Op::Draw {
                            vertices,
                            instances,
                            first_vertex,
                            first_instance,
                        }),
                        Some(DrawCmd::DrawIndexed {
                            indices,
                            instances,
                            first_index,
                            base_vertex,
                            first_instance,
                        }) => b.op(&Op::DrawIndexed {
                            indices,
                            instances,
                            first_index,
                            base_vertex,
                            first_instance,
                        }),
                        None => {}
                    }
                    b.op(&Op::EndPass);
                }
                FrameItem::Compute(id) => {
                    let pass = &module.compute_passes[id as usize];
                    b.require(PluginSet::COMPUTE);
                    b.op(&Op::BeginComputePass);
                    b.op(&Op::SetPipeline { id: pass.pipeline });
                    for (i, &bg) in pass.bind_groups.iter().enumerate() {
                        let slot = module.bind_groups[bg as usize]
                            .explicit_group
                            .unwrap_or(i as u32);
                        b.op(&Op::SetBindGroup {
                            slot,
                            id: bg,
                            dynamic_offsets: Vec::new(),
                        });
                    }
                    let [x, y, z] = pass.dispatch;
                    b.op(&Op::Dispatch { x, y, z });
                    b.op(&Op::EndPass);
                }
                FrameItem::Queue(id) => {
                    let queue = &module.queues[id as usize];
                    for w in &queue.writes {
                        let len = module.datas[w.data as usize].bytes.len() as u32;
                        b.require(PluginSet::UPDATE);
                        b.op(&Op::WriteBuffer {
                            buffer: w.buffer,
                            offset: w.offset,
                            data: blob_data[w.data as usize],
                            len,
                        });
                    }
                }
            }
        }
        b.op(&Op::Submit);
    }

    // -- uniform reflection table --
    let mut bindings = Vec::with_capacity(module.uniform_bindings.len());
    for u in &module.uniform_bindings {
        let name = b.intern(&u.var_name);
        let mut fields = Vec::with_capacity(u.fields.len());
        for (slot, f) in u.fields.iter().enumerate() {
            let offset = u16::try_from(f.offset)
                .map_err(|_| format!("uniform field `{}` offset exceeds u16", f.path))?;
            let size = u16::try_from(f.size)
                .map_err(|_| format!("uniform field `{}` size exceeds u16", f.path))?;
            fields.push(UniformField {
                slot: slot as u16,
                name: b.intern(&f.path),
                offset,
                size,
                ty: f.ty,
            });
        }
        bindings.push(UniformBinding {
            buffer_id: u.buffer,
            name,
            group: u8::try_from(u.group).map_err(|_| "bind group index exceeds u8".to_owned())?,
            binding: u8::try_from(u.binding).map_err(|_| "binding index exceeds u8".to_owned())?,
            fields,
        });
    }
    b.set_uniforms(bindings);

    Ok(b.finish())
}

/// Bytes per texel for formats the `#texture data=` upload path accepts.
fn texel_size(format: TextureFormat) -> Option<u32> {
    use TextureFormat::*;
    Some(match format {
        R8Unorm => 1,
        Rg8Unorm | R16Float => 2,
        Rgba8Unorm | Rgba8UnormSrgb | Bgra8Unorm | Bgra8UnormSrgb | Rgba8Snorm | Rg16Float
        | R32Float | R32Uint | R32Sint | Rgb10a2Unorm => 4,
        Rgba16Float | Rg32Float | Rg32Uint => 8,
        Rgba32Float | Rgba32Uint => 16,
        Depth24Plus | Depth24PlusStencil8 | Depth32Float => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::analyzer::analyze;
    use crate::compiler::lexer::lex;
    use crate::compiler::parser::parse;
    use crate::compiler::reflect::NagaReflector;
    use crate::pngb::loader::Pngb;
    use crate::pngb::opcodes as op;

    fn compile_module(src: &str) -> Vec<u8> {
        let ts = lex(src).unwrap();
        let (ast, errors) = parse(src, &ts);
        assert!(errors.is_empty(), "{errors:?}");
        let analysis = analyze(src, &ast, &NagaReflector).unwrap();
        emit(&analysis.module).unwrap()
    }

    const TRIANGLE: &str = r#"
#wgsl shader {
    code="""
@vertex fn vs(@builtin(vertex_index) i: u32) -> @builtin(position) vec4f {
    return vec4f(0.0);
}
@fragment fn fs() -> @location(0) vec4f { return vec4f(1.0); }
"""
}
#renderPipeline pipe {
    layout=auto
    vertex={ module=shader entryPoint="vs" }
    fragment={ module=shader entryPoint="fs" targets=[{ format=rgba8unorm }] }
}
#renderPass main {
    colorAttachments=[{ view=canvas clearValue=[0 0 0 1] }]
    pipeline=pipe
    draw=3
}
#frame display { passes=[main] }
"#;

    #[test]
    fn triangle_opcode_order() {
        let payload = compile_module(TRIANGLE);
        let index = Pngb::parse(&payload).unwrap();
        let view = index.view(&payload);
        let tags: Vec<u8> = view
            .ops()
            .map(|r| match r.unwrap().1 {
                Op::CreateShader { .. } => op::CREATE_SHADER,
                Op::CreateRenderPipeline { .. } => op::CREATE_RENDER_PIPELINE,
                Op::Frame { .. } => op::FRAME,
                Op::BeginRenderPass { .. } => op::BEGIN_RENDER_PASS,
                Op::SetPipeline { .. } => op::SET_PIPELINE,
                Op::Draw { .. } => op::DRAW,
                Op::EndPass => op::END_PASS,
                Op::Submit => op::SUBMIT,
                Op::End => op::END,
                other => panic!("unexpected op {other:?}"),
            })
            .collect();
        assert_eq!(
            tags,
            vec![
                op::CREATE_SHADER,
                op::CREATE_RENDER_PIPELINE,
                op::FRAME,
                op::BEGIN_RENDER_PASS,
                op::SET_PIPELINE,
                op::DRAW,
                op::END_PASS,
                op::SUBMIT,
                op::END,
            ]
        );
    }

    #[test]
    fn plugin_set_reflects_opcode_families() {
        let payload = compile_module(TRIANGLE);
        let index = Pngb::parse(&payload).unwrap();
        assert!(index.plugins.contains(PluginSet::RENDER));
        assert!(!index.plugins.contains(PluginSet::COMPUTE));
    }

    #[test]
    fn every_referenced_id_is_created_earlier() {
        let payload = compile_module(TRIANGLE);
        let index = Pngb::parse(&payload).unwrap();
        let view = index.view(&payload);
        let mut shaders = 0u32;
        let mut pipelines = 0u32;
        for r in view.ops() {
            match r.unwrap().1 {
                Op::CreateShader { id, .. } => {
                    assert_eq!(id as u32, shaders);
                    shaders += 1;
                }
                Op::CreateRenderPipeline { id, desc } => {
                    let d = view.data(desc).unwrap();
                    let decoded = desc::RenderPipelineDesc::decode(d).unwrap();
                    assert!((decoded.vertex_module as u32) < shaders);
                    assert_eq!(id as u32, pipelines);
                    pipelines += 1;
                }
                Op::SetPipeline { id } => assert!((id as u32) < pipelines),
                _ => {}
            }
        }
    }

    #[test]
    fn uniform_table_emission() {
        let src = r#"
#wgsl shader {
    code="""
struct U { time: f32 }
@group(0) @binding(0) var<uniform> u: U;
@vertex fn vs() -> @builtin(position) vec4f { return vec4f(u.time); }
@fragment fn fs() -> @location(0) vec4f { return vec4f(1.0); }
"""
}
#buffer uniforms { size=shader.u usage=[UNIFORM COPY_DST] }
#bindGroup bg { pipeline=pipe entries=[{ binding=0 resource=uniforms }] }
#renderPipeline pipe {
    layout=auto
    vertex={ module=shader entryPoint="vs" }
    fragment={ module=shader entryPoint="fs" targets=[{ format=rgba8unorm }] }
}
#renderPass main {
    colorAttachments=[{ view=canvas clearValue=[0 0 0 1] }]
    pipeline=pipe
    bindGroups=[bg]
    draw=3
}
#frame display { passes=[main] }
"#;
        let payload = compile_module(src);
        let index = Pngb::parse(&payload).unwrap();
        let view = index.view(&payload);
        let uniforms = index.uniforms.as_ref().expect("uniform table present");
        assert_eq!(uniforms.len(), 1);
        let b = &uniforms[0];
        assert_eq!((b.buffer_id, b.group, b.binding), (0, 0, 0));
        assert_eq!(view.string(b.name).unwrap(), "u");
        assert_eq!(b.fields.len(), 1);
        let f = &b.fields[0];
        assert_eq!(view.string(f.name).unwrap(), "time");
        assert_eq!((f.slot, f.offset, f.size), (0, 0, 4));
        assert!(index.plugins.contains(PluginSet::UNIFORMS));
    }

    #[test]
    fn dynamic_bind_groups_live_in_the_frame_body() {
        let src = r#"
#wgsl sim {
    code="""
@group(0) @binding(0) var<storage, read_write> data: array<f32>;
@compute @workgroup_size(1) fn step() {}
"""
}
#buffer particles { size=64 usage=[STORAGE] pool=2 }
#bindGroupLayout l { entries=[{ binding=0 visibility=[COMPUTE] type=storage }] }
#pipelineLayout pl { layouts=[l] }
#computePipeline pipe { layout=pl module=sim entryPoint="step" }
#bindGroup read { layout=l entries=[{ binding=0 resource=particles poolOffset=0 }] }
#computePass step { pipeline=pipe bindGroups=[read] dispatch=1 }
#frame run { passes=[step] }
"#;
        let payload = compile_module(src);
        let index = Pngb::parse(&payload).unwrap();
        let view = index.view(&payload);
        let mut saw_frame = false;
        let mut bind_group_after_frame = false;
        for r in view.ops() {
            match r.unwrap().1 {
                Op::Frame { .. } => saw_frame = true,
                Op::CreateBindGroup { .. } => {
                    assert!(saw_frame, "dynamic bind group must be in the frame body");
                    bind_group_after_frame = true;
                }
                _ => {}
            }
        }
        assert!(bind_group_after_frame);
    }
}
