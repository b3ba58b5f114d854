//! Fixtures shared by the format tests.

use otb::{CatalogVersion, ItemCatalog, ItemGroup, ItemType, ItemTypeFlags};

use crate::map::{Item, Map, Position, Tile, TileFlags, Town, Waypoint};

pub fn catalog() -> ItemCatalog {
    let mut catalog = ItemCatalog::new(CatalogVersion {
        major: 3,
        minor: 60,
        build: 29,
    });
    catalog.insert(ItemType {
        server_id: 100,
        client_id: 3031,
        name: "gold coin".into(),
        flags: ItemTypeFlags::STACKABLE | ItemTypeFlags::PICKUPABLE,
        ..ItemType::default()
    });
    catalog.insert(ItemType {
        server_id: 406,
        client_id: 4526,
        name: "grass".into(),
        group: ItemGroup::Ground,
        ..ItemType::default()
    });
    catalog.insert(ItemType {
        server_id: 1987,
        client_id: 1740,
        name: "bag".into(),
        group: ItemGroup::Container,
        ..ItemType::default()
    });
    catalog.insert(ItemType {
        server_id: 2006,
        client_id: 2886,
        name: "vial".into(),
        group: ItemGroup::Fluid,
        ..ItemType::default()
    });
    catalog.insert(ItemType {
        server_id: 2000,
        client_id: 2001,
        name: "sign".into(),
        ..ItemType::default()
    });
    catalog
}

/// A small map exercising every persisted feature: flags, house tiles,
/// inline and full-node grounds, nested containers, stacks, fluids, written
/// text, towns and waypoints, spread over two areas on two floors.
pub fn sample_map() -> Map {
    let mut map = Map {
        otbm_version: 2,
        width: 2048,
        height: 2048,
        otb_major: 3,
        otb_minor: 60,
        description: "unit test map".into(),
        spawn_file: "test-spawn.xml".into(),
        house_file: "test-house.xml".into(),
        ..Map::default()
    };

    let mut pz = Tile {
        flags: TileFlags::PROTECTION_ZONE,
        ..Tile::default()
    };
    pz.ground = Some(Item::new(406));
    map.set_tile(Position::new(100, 100, 7), pz);

    let mut house = Tile {
        house_id: 42,
        ..Tile::default()
    };
    house.ground = Some(Item::new(406));
    let mut door = Item::new(2000);
    door.action_id = 1000;
    door.door_id = 3;
    house.items.push(door);
    map.set_tile(Position::new(101, 100, 7), house);

    let mut chest_tile = Tile::default();
    chest_tile.ground = Some(Item::new(406));
    let mut bag = Item::new(1987);
    let mut coins = Item::new(100);
    coins.count = 50;
    let mut inner_bag = Item::new(1987);
    let mut vial = Item::new(2006);
    vial.count = 7;
    inner_bag.contents.push(vial);
    bag.contents.push(coins);
    bag.contents.push(inner_bag);
    chest_tile.items.push(bag);
    map.set_tile(Position::new(100, 101, 7), chest_tile);

    let mut sign_tile = Tile::default();
    sign_tile.ground = Some(Item::new(406));
    let mut sign = Item::new(2000);
    sign.text = "keep out".into();
    sign.written_by = "the mayor".into();
    sign_tile.items.push(sign);
    map.set_tile(Position::new(300, 80, 6), sign_tile);

    map.towns.push(Town {
        id: 1,
        name: "Sandport".into(),
        temple: Position::new(110, 110, 7),
    });
    map.waypoints.push(Waypoint {
        name: "bridge".into(),
        position: Position::new(120, 100, 7),
    });
    map
}
