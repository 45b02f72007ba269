use std::sync::Arc;
use voxel::{
    block::BlockRegistry,
    hit::{BlockHitResult, PostponedBlockHit, RAY_EPSILON},
    util::{UnlocalizedName, Vector},
    world::{chunk::Chunk, BlockChangeCause, BlockPos, ChunkPos, Direction, LocalPos, World},
};

// One loaded chunk at the origin, all air except a single stone block at local (5, 5, 5)
fn single_block_world() -> World {
    let registry = Arc::new(BlockRegistry::with_defaults());
    let stone = registry.by_name(&UnlocalizedName::engine("stone")).unwrap().clone();
    let mut chunk = Chunk::air(ChunkPos::new(0, 0, 0), registry.clone());
    chunk
        .set_block(LocalPos::new(5, 5, 5).unwrap(), &stone, &BlockChangeCause::WorldGen)
        .unwrap();

    let world = World::new("overworld", registry);
    world.cache_chunk(chunk);
    world
}

#[test]
fn ray_hits_the_west_face() {
    let world = single_block_world();
    let result = world.raycast(Vector::rect(0.0, 5.5, 5.5), Vector::rect(1.0, 0.0, 0.0), 20.0);

    let mut hits = 0;
    result.if_success(|hit| {
        hits += 1;
        assert_eq!(hit.pos(), BlockPos::new(5, 5, 5));
        assert_eq!(hit.direction(), Direction::West);
        assert!((hit.hit_point().x - 5.0).abs() < 1e-9);
        assert!((hit.hit_point().y - 5.5).abs() < 1e-9);
        assert_eq!(hit.block().name(), &UnlocalizedName::engine("stone"));
        assert!(std::ptr::eq(hit.world(), &world));
    });
    assert_eq!(hits, 1);
}

#[test]
fn short_ray_misses() {
    let world = single_block_world();
    let result = world.raycast(Vector::rect(0.0, 5.5, 5.5), Vector::rect(1.0, 0.0, 0.0), 3.0);
    assert_eq!(result, BlockHitResult::Miss);
}

#[test]
fn range_is_inclusive_of_the_boundary() {
    let world = single_block_world();
    let origin = Vector::rect(0.0, 5.5, 5.5);
    let east = Vector::rect(1.0, 0.0, 0.0);

    assert!(!world.raycast(origin, east, 5.0).is_miss());
    assert!(world.raycast(origin, east, 5.0 - 1e-3).is_miss());
}

#[test]
fn origins_within_epsilon_of_a_face_snap_to_it() {
    let world = single_block_world();
    let nudged = Vector::rect(5.0 - RAY_EPSILON / 2.0, 5.5, 5.5);

    let hit = world
        .raycast(nudged, Vector::rect(1.0, 0.0, 0.0), 1.0)
        .into_hit()
        .expect("ray starting on the face should hit");
    assert_eq!(hit.pos(), BlockPos::new(5, 5, 5));
    assert_eq!(hit.direction(), Direction::West);
}

#[test]
fn every_face_is_reported() {
    let world = single_block_world();
    let center = BlockPos::new(5, 5, 5).center();

    for direction in Direction::ALL {
        let normal = BlockPos::new(0, 0, 0).offset(direction);
        let outward = Vector::rect(normal.x as f64, normal.y as f64, normal.z as f64);
        let origin = center + outward * 4.0;

        let hit = world
            .raycast(origin, outward * -1.0, 10.0)
            .into_hit()
            .unwrap_or_else(|| panic!("ray from the {:?} side missed", direction));
        assert_eq!(hit.direction(), direction);
        assert_eq!(BlockPos::new(5, 5, 5).offset(hit.direction()), BlockPos::containing(center + outward));
    }
}

#[test]
fn casts_are_deterministic() {
    let world = single_block_world();
    let origin = Vector::rect(0.25, 0.75, 0.5);
    let direction = Vector::rect(5.25, 5.0, 5.0) - origin;

    let results = (0 .. 16)
        .map(|_| world.raycast(origin, direction, 50.0).hit().map(|hit| hit.postpone()))
        .collect::<Vec<Option<PostponedBlockHit>>>();

    assert!(results[0].is_some());
    assert!(results.iter().all(|result| *result == results[0]));
}
