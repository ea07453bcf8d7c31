use serde_json::json;
use skinpipe::{
    EquipCategory, LegacyLoadOptions, LegacyModel, PackageLoadOptions, SkeletonPlayer,
    WeightPolicy, load_package_dir,
};
use std::path::PathBuf;
use std::sync::Arc;

fn dump_legacy(
    path: &PathBuf,
    animation: Option<&str>,
    time: f32,
    libraries: &[String],
    parts: &[(String, String)],
    policy: WeightPolicy,
) -> serde_json::Value {
    let mut model = LegacyModel::new(LegacyLoadOptions {
        weight_policy: policy,
        ..LegacyLoadOptions::default()
    });
    model.load_base_model(path).expect("load legacy model");

    for library in libraries {
        if !model.append_part_library(library, false) {
            eprintln!("part library not appended: {library}");
        }
    }
    for (tag, name) in parts {
        if !model.set_part(tag, name) {
            eprintln!("part not selected: {tag}={name}");
        }
    }
    if let Some(animation) = animation {
        model.load_animation(animation).expect("load animation");
        model.update(time.max(0.0)).expect("update");
    }

    let geometry = model.merged_geometry();
    let bones: Vec<_> = model
        .bones()
        .iter()
        .enumerate()
        .map(|(i, bone)| {
            let world = model.bone_matrix(&bone.name).unwrap_or(bone.bind_global);
            json!({
                "i": i,
                "name": bone.name,
                "parent": bone.parent,
                "world": world.to_cols_array(),
            })
        })
        .collect();
    let selection: serde_json::Map<_, _> = model
        .selection()
        .iter()
        .map(|(category, name)| (category.tag().to_string(), json!(name)))
        .collect();
    let candidates: serde_json::Map<_, _> = EquipCategory::ALL
        .into_iter()
        .map(|c| (c.tag().to_string(), json!(model.candidates(c))))
        .collect();

    json!({
        "kind": model.kind(),
        "rootBone": model.root_bone(),
        "time": model.time(),
        "bones": bones,
        "textures": model.texture_names(),
        "nodes": model.node_names().collect::<Vec<_>>(),
        "selection": selection,
        "candidates": candidates,
        "vertices": geometry.vertices.len(),
        "indices": geometry.indices.len(),
        "subsets": geometry.subsets,
        "firstPositions": geometry.vertices.iter().take(8).map(|v| v.position).collect::<Vec<_>>(),
    })
}

fn dump_package(path: &PathBuf, clip: Option<&str>, time: f32) -> serde_json::Value {
    let model_id = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("model")
        .to_string();
    let package = load_package_dir(path, &model_id, &PackageLoadOptions::default())
        .expect("load package");
    let package = Arc::new(package);

    let mut player = SkeletonPlayer::with_package(Arc::clone(&package));
    if let Some(clip) = clip {
        player.set_clip(clip).expect("set clip");
        player.update(time.max(0.0));
    }
    let order = player.composition_order();
    let palette: Vec<_> = player
        .palette_or_bind_pose()
        .iter()
        .map(|m| m.to_cols_array())
        .collect();

    let bones: Vec<_> = package
        .bones
        .iter()
        .enumerate()
        .map(|(i, b)| json!({"i": i, "name": b.name, "parent": b.parent}))
        .collect();
    let clips: Vec<_> = package
        .clips
        .iter()
        .map(|c| json!({"name": c.name, "channels": c.channels.len(), "duration": c.duration()}))
        .collect();
    let materials: Vec<_> = package
        .materials
        .iter()
        .map(|m| {
            let params = skinpipe::PbrMaterialParams::from_material(m);
            json!({
                "baseColor": m.base_color_texture,
                "metallic": params.metallic,
                "roughness": params.roughness,
                "alphaCutoff": params.alpha_cutoff,
                "twoSided": params.two_sided(),
            })
        })
        .collect();

    json!({
        "modelId": package.model_id,
        "sourceGlb": package.source_glb,
        "vertices": package.vertices.len(),
        "indices": package.indices.len(),
        "submeshes": package.submeshes.len(),
        "conventions": package.conventions,
        "order": order,
        "bones": bones,
        "clips": clips,
        "materials": materials,
        "sockets": package.sockets,
        "time": player.sample_time(),
        "palette": palette,
    })
}

fn main() {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut positional = Vec::<String>::new();
    let mut libraries = Vec::<String>::new();
    let mut parts = Vec::<(String, String)>::new();
    let mut policy = WeightPolicy::Top4;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--library" => {
                libraries.extend(args.get(i + 1).cloned());
                i += 2;
            }
            "--part" => {
                if let Some((tag, name)) = args.get(i + 1).and_then(|s| s.split_once('=')) {
                    parts.push((tag.to_string(), name.to_string()));
                }
                i += 2;
            }
            "--triple-weights" => {
                policy = WeightPolicy::TripleCompat;
                i += 1;
            }
            other => {
                positional.push(other.to_string());
                i += 1;
            }
        }
    }

    let Some(path) = positional.first().map(PathBuf::from) else {
        eprintln!(
            "usage: model_dump <model file | package dir> [animation | clip] [time] \
             [--library path] [--part tag=name] [--triple-weights]"
        );
        std::process::exit(2);
    };
    let animation = positional.get(1).map(String::as_str);
    let time: f32 = positional
        .get(2)
        .map(|s| s.parse().unwrap_or(0.0))
        .unwrap_or(0.0);

    let out = if path.is_dir() {
        dump_package(&path, animation, time)
    } else {
        dump_legacy(&path, animation, time, &libraries, &parts, policy)
    };
    println!("{}", serde_json::to_string_pretty(&out).expect("serialize"));
}
