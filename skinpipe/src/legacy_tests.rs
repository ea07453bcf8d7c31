use crate::legacy::{parse_legacy_animation, parse_legacy_model, parse_per_node};
use crate::test_fixtures::{
    AnimBoneSpec, MeshSpec, NodeSpec, legacy_animation, per_node_file, physique_one,
    push_u32, weighted_file,
};
use crate::{Error, LegacyFile, ParseLimits};
use glam::{Mat4, Quat, Vec2, Vec3};
use std::path::Path;

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-5,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn assert_vec3_approx(actual: Vec3, expected: Vec3) {
    assert_approx(actual.x, expected.x);
    assert_approx(actual.y, expected.y);
    assert_approx(actual.z, expected.z);
}

fn sample_per_node() -> Vec<u8> {
    let mut face = NodeSpec::triangle("eq_face_01", "Bip01", 0, 0.0);
    face.physique = vec![
        physique_one("Bip01", 0, 1.0, Vec3::X),
        physique_one("Bip01", 0, 1.0, Vec3::Y),
        physique_one("Bip01", 0, 1.0, Vec3::Z),
    ];
    per_node_file(
        &[(0, "face.bmp"), (1, "textures/head.bmp")],
        &[
            NodeSpec::bone("Bip01", "", Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0))),
            face,
            NodeSpec::quad("body", "Bip01", 1),
        ],
    )
}

#[test]
fn per_node_file_parses_materials_and_nodes() {
    let bytes = sample_per_node();
    let file = parse_per_node(&bytes, Some(Path::new("models/man")), &ParseLimits::default())
        .expect("parse");

    assert_eq!(file.materials.len(), 2);
    assert_eq!(file.materials[0].id, 0);
    assert_eq!(file.materials[0].diffuse_texture, "models/man/face.bmp");
    assert_eq!(file.materials[1].diffuse_texture, "textures/head.bmp");
    assert!(file.materials[0].two_sided);

    assert_eq!(file.nodes.len(), 3);
    let root = &file.nodes[0];
    assert_eq!(root.name, "Bip01");
    assert_eq!(root.parent, "");
    assert_vec3_approx(root.local.w_axis.truncate(), Vec3::new(0.0, 0.0, 5.0));
    assert!(root.points.is_empty());

    let face = &file.nodes[1];
    assert_eq!(face.parent, "Bip01");
    assert_eq!(face.points.len(), 3);
    assert_eq!(face.faces.len(), 1);
    assert_eq!(face.face_normals.len(), 1);
    assert_eq!(face.faces[0].point_index, [0, 1, 2]);
    assert_eq!(face.faces[0].uv[1], Vec2::X);
    assert_eq!(face.physique.len(), 3);
    assert_eq!(face.physique[1].bone_names[0], "Bip01");
    assert_eq!(face.physique[1].influence_count(), 1);
    assert_vec3_approx(face.physique[1].offsets[0], Vec3::Y);

    let body = &file.nodes[2];
    assert_eq!(body.material_id, 1);
    assert_eq!(body.faces.len(), 2);
}

#[test]
fn legacy_model_dispatches_on_version() {
    let bytes = sample_per_node();
    let file = parse_legacy_model(&bytes, None, &ParseLimits::default()).expect("parse");
    let LegacyFile::PerNode(file) = file else {
        panic!("expected the per-node layout");
    };
    assert_eq!(file.materials[0].diffuse_texture, "face.bmp");

    let mesh = MeshSpec {
        name: "root".to_string(),
        local: Mat4::IDENTITY,
        vertices: vec![(Vec3::ZERO, Vec3::Z, Vec2::ZERO); 3],
        indices: vec![0, 1, 2],
        ..MeshSpec::default()
    };
    let bytes = weighted_file(0x5005, &["skin.bmp"], &[mesh]);
    let file = parse_legacy_model(&bytes, Some(Path::new("m")), &ParseLimits::default())
        .expect("parse");
    let LegacyFile::Weighted(file) = file else {
        panic!("expected the weighted layout");
    };
    assert_eq!(file.version, 0x5005);
    assert_eq!(file.materials[0].diffuse_texture, "m/skin.bmp");
    assert_eq!(file.meshes[0].indices, vec![0, 1, 2]);
}

#[test]
fn weighted_file_keeps_weights_per_mesh() {
    let root = MeshSpec {
        name: "root".to_string(),
        local: Mat4::IDENTITY,
        vertices: vec![(Vec3::ONE, Vec3::Z, Vec2::ONE); 2],
        weights: vec![
            ("root".to_string(), 0.75, 0),
            ("arm".to_string(), 0.25, 0),
            ("arm".to_string(), 1.0, 1),
        ],
        indices: vec![0, 1, 1],
        ..MeshSpec::default()
    };
    let arm = MeshSpec {
        name: "arm".to_string(),
        parent: "root".to_string(),
        local: Mat4::from_translation(Vec3::X),
        ..MeshSpec::default()
    };
    let bytes = weighted_file(0x5005, &[], &[root, arm]);
    let LegacyFile::Weighted(file) =
        parse_legacy_model(&bytes, None, &ParseLimits::default()).expect("parse")
    else {
        panic!("expected the weighted layout");
    };

    assert_eq!(file.meshes.len(), 2);
    let root = &file.meshes[0];
    assert_eq!(root.vertices.len(), 2);
    assert_eq!(root.weights.len(), 3);
    assert_eq!(root.weights[1].bone_name, "arm");
    assert_approx(root.weights[1].weight, 0.25);
    assert_eq!(root.weights[2].vertex, 1);
    assert_eq!(file.meshes[1].parent, "root");
    assert!(file.meshes[1].vertices.is_empty());
}

#[test]
fn weighted_index_outside_its_mesh_is_rejected() {
    let mesh = MeshSpec {
        name: "root".to_string(),
        local: Mat4::IDENTITY,
        vertices: vec![(Vec3::ZERO, Vec3::Z, Vec2::ZERO); 3],
        indices: vec![0, 1, 3],
        ..MeshSpec::default()
    };
    let bytes = weighted_file(0x5005, &[], &[mesh]);
    let err = parse_legacy_model(&bytes, None, &ParseLimits::default()).unwrap_err();
    assert!(matches!(err, Error::IndexOutOfRange { index: 3, len: 3, .. }), "{err}");
}

#[test]
fn bad_signature_is_rejected() {
    let mut bytes = sample_per_node();
    bytes[0] ^= 0xFF;
    let err = parse_legacy_model(&bytes, None, &ParseLimits::default()).unwrap_err();
    assert!(matches!(err, Error::BadMagic { .. }), "{err}");

    let mut bytes = legacy_animation(0x12, 1, &[AnimBoneSpec::default()]);
    bytes[3] ^= 0xFF;
    let err = parse_legacy_animation(&bytes, &ParseLimits::default()).unwrap_err();
    assert!(matches!(err, Error::BadMagic { .. }), "{err}");
}

#[test]
fn part_library_requires_the_per_node_version() {
    let mesh = MeshSpec {
        name: "root".to_string(),
        local: Mat4::IDENTITY,
        ..MeshSpec::default()
    };
    let bytes = weighted_file(0x5005, &[], &[mesh]);
    let err = parse_per_node(&bytes, None, &ParseLimits::default()).unwrap_err();
    assert!(
        matches!(err, Error::UnsupportedVersion { version: 0x5005, .. }),
        "{err}"
    );
}

#[test]
fn per_node_node_count_must_be_positive_and_bounded() {
    let bytes = per_node_file(&[], &[]);
    let err = parse_per_node(&bytes, None, &ParseLimits::default()).unwrap_err();
    assert!(matches!(err, Error::CountOutOfRange { count: 0, .. }), "{err}");

    let limits = ParseLimits {
        legacy_meshes: 2,
        ..ParseLimits::default()
    };
    let err = parse_per_node(&sample_per_node(), None, &limits).unwrap_err();
    assert!(matches!(err, Error::CountOutOfRange { count: 3, max: 2, .. }), "{err}");
}

#[test]
fn negative_weighted_counts_are_rejected() {
    let mut bytes = Vec::new();
    push_u32(&mut bytes, crate::legacy::EXPORTER_SIGNATURE);
    push_u32(&mut bytes, 0x5005);
    push_u32(&mut bytes, 0);
    push_u32(&mut bytes, u32::MAX);
    let err = parse_legacy_model(&bytes, None, &ParseLimits::default()).unwrap_err();
    assert!(matches!(err, Error::CountOutOfRange { count: -1, .. }), "{err}");
}

#[test]
fn truncated_input_reports_eof() {
    let bytes = sample_per_node();
    for len in [0, 3, 15, 600, bytes.len() - 1] {
        let err = parse_legacy_model(&bytes[..len], None, &ParseLimits::default()).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof { .. }), "len {len}: {err}");
    }
}

#[test]
fn huge_point_count_fails_before_allocating() {
    let mut node = NodeSpec::triangle("eq_face_01", "", 0, 0.0);
    node.points.clear();
    node.faces.clear();
    node.normals.clear();
    let mut bytes = per_node_file(&[], &[node]);
    // point count follows the 16-byte header, two names, the local matrix and 108 skipped bytes
    let at = 16 + 80 + 64 + 108;
    bytes[at..at + 4].copy_from_slice(&250_000i32.to_le_bytes());
    let err = parse_per_node(&bytes, None, &ParseLimits::default()).unwrap_err();
    assert!(matches!(err, Error::UnexpectedEof { .. }), "{err}");
}

#[test]
fn animation_bakes_sparse_keys_per_frame() {
    let bone = AnimBoneSpec {
        name: "Bip01".to_string(),
        positions: vec![(Vec3::ZERO, 0), (Vec3::new(4.0, 0.0, 0.0), 4)],
        rotations: vec![
            (Quat::IDENTITY, 0),
            (Quat::from_rotation_z(std::f32::consts::FRAC_PI_2), 4),
        ],
        visibility: 0,
    };
    let bytes = legacy_animation(0x12, 4, &[bone]);
    let anim = parse_legacy_animation(&bytes, &ParseLimits::default()).expect("parse");

    assert_eq!(anim.frame_count, 5);
    assert_approx(anim.max_time, 5.0);
    let track = anim.track("Bip01").expect("track");
    assert_eq!(track.frames.len(), 5);
    assert_vec3_approx(track.frames[2].position, Vec3::new(2.0, 0.0, 0.0));
    let expected = Quat::from_rotation_z(std::f32::consts::FRAC_PI_4);
    assert!(track.frames[2].rotation.abs_diff_eq(expected, 1e-5));
    assert_vec3_approx(track.frames[4].position, Vec3::new(4.0, 0.0, 0.0));
    assert!(anim.track("Bip01 Spine").is_none());
}

#[test]
fn animation_frame_count_is_clamped() {
    let bone = AnimBoneSpec {
        name: "Bip01".to_string(),
        ..AnimBoneSpec::default()
    };
    let bytes = legacy_animation(0x12, 100_000, std::slice::from_ref(&bone));
    let anim = parse_legacy_animation(&bytes, &ParseLimits::default()).expect("parse");
    assert_eq!(anim.frame_count, 4096);

    let bytes = legacy_animation(0x12, -7, &[bone]);
    let anim = parse_legacy_animation(&bytes, &ParseLimits::default()).expect("parse");
    assert_eq!(anim.frame_count, 1);
    assert_eq!(anim.tracks[0].frames[0].rotation, Quat::IDENTITY);
}

#[test]
fn animation_skips_visibility_keys_on_newer_versions() {
    let bones = [
        AnimBoneSpec {
            name: "a".to_string(),
            positions: vec![(Vec3::ONE, 0)],
            visibility: 3,
            ..AnimBoneSpec::default()
        },
        AnimBoneSpec {
            name: "b".to_string(),
            positions: vec![(Vec3::X, 0)],
            visibility: 1,
            ..AnimBoneSpec::default()
        },
    ];
    let bytes = legacy_animation(0x13, 2, &bones);
    let anim = parse_legacy_animation(&bytes, &ParseLimits::default()).expect("parse");
    assert_eq!(anim.tracks.len(), 2);
    assert_vec3_approx(anim.track("b").expect("b").frames[1].position, Vec3::X);
}

#[test]
fn animation_without_tracks_is_rejected() {
    let bytes = legacy_animation(0x12, 10, &[]);
    let err = parse_legacy_animation(&bytes, &ParseLimits::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidValue { .. }), "{err}");
}
