use std::error::Error;
use std::sync::{Arc, Mutex};

use ip4_fib::adjacency::{Adjacency, LookupNext};
use ip4_fib::config::FibConfig;
use ip4_fib::errors::FibError;
use ip4_fib::{Adj, FibIndex, IfAddr, Main, Prefix, Si};

mod common {
    use std::io::Write;

    pub fn init() {
        let _ = env_logger::builder()
            .format(|buf, record| writeln!(buf, "{}", record.args()))
            .is_test(true)
            .try_init();
    }
}

const SI: Si = Si(1);

fn lookup_next(main: &Main, adj: Adj) -> Result<LookupNext, Box<dyn Error>> {
    Ok(main
        .adjacencies()
        .get_adj(adj)?
        .first()
        .ok_or("empty block")?
        .lookup_next)
}

#[test]
fn connected_and_local_routes() -> Result<(), Box<dyn Error>> {
    crate::common::init();

    let mut main = Main::new()?;
    let address: Prefix = "10.0.0.1/24".parse()?;
    let ia = main.add_del_interface_address(SI, &address, false)?;
    // Nothing is installed while the interface is down.
    assert!(main.fib(FibIndex::DEFAULT).ok_or("no table")?.is_empty());

    main.sw_if_admin_up_down(SI, true)?;
    let glean = main.get_route(&"10.0.0.0/24".parse()?, SI).ok_or("no glean route")?;
    let local = main.get_route(&"10.0.0.1/32".parse()?, SI).ok_or("no local route")?;
    assert_eq!(lookup_next(&main, glean)?, LookupNext::Glean);
    assert_eq!(lookup_next(&main, local)?, LookupNext::Local);

    let record = &main.adjacencies().get_adj(glean)?[0];
    assert_eq!(record.if_addr, Some(ia));
    assert_eq!(record.si, Some(SI));
    assert_eq!(
        main.if_address(ia).and_then(|ifa| ifa.glean_adj),
        Some(glean)
    );

    assert_eq!(main.lookup(FibIndex::DEFAULT, "10.0.0.77".parse()?)?, glean);
    assert_eq!(main.lookup(FibIndex::DEFAULT, "10.0.0.1".parse()?)?, local);
    assert_eq!(main.lookup(FibIndex::DEFAULT, "10.0.1.1".parse()?)?, Adj::MISS);
    Ok(())
}

#[test]
fn host_address_has_no_glean_route() -> Result<(), Box<dyn Error>> {
    crate::common::init();

    let mut main = Main::new()?;
    main.sw_if_admin_up_down(SI, true)?;
    let ia = main.add_del_interface_address(SI, &"192.0.2.1/32".parse()?, false)?;

    let fib = main.fib(FibIndex::DEFAULT).ok_or("no table")?;
    assert_eq!(fib.len(), 1);
    let local = main.get_route(&"192.0.2.1/32".parse()?, SI).ok_or("no local route")?;
    assert_eq!(lookup_next(&main, local)?, LookupNext::Local);
    assert_eq!(main.if_address(ia).and_then(|ifa| ifa.glean_adj), None);
    Ok(())
}

#[test]
fn overlapping_addresses() -> Result<(), Box<dyn Error>> {
    crate::common::init();

    let mut main = Main::new()?;
    let address: Prefix = "10.0.0.1/24".parse()?;
    let ia = main.add_del_interface_address(SI, &address, false)?;

    assert_eq!(main.add_del_interface_address(SI, &address, false)?, ia);
    assert_eq!(
        main.add_del_interface_address(SI, &"10.0.0.5/16".parse()?, false),
        Err(FibError::AddressConflict {
            new: "10.0.0.5/16".parse()?,
            existing: address,
        })
    );
    assert_eq!(
        main.add_del_interface_address(SI, &"10.0.0.9/28".parse()?, false),
        Err(FibError::AddressConflict {
            new: "10.0.0.9/28".parse()?,
            existing: address,
        })
    );

    // Other interfaces and other networks are fine.
    let other = main.add_del_interface_address(Si(2), &address, false)?;
    assert_ne!(other, ia);
    main.add_del_interface_address(SI, &"10.0.1.1/24".parse()?, false)?;
    assert_eq!(main.if_addresses(SI).len(), 2);
    Ok(())
}

#[test]
fn admin_down_takes_routes_away() -> Result<(), Box<dyn Error>> {
    crate::common::init();

    let mut main = Main::new()?;
    let ia = main.add_del_interface_address(SI, &"10.0.0.1/24".parse()?, false)?;
    main.sw_if_admin_up_down(SI, true)?;
    let glean = main.get_route(&"10.0.0.0/24".parse()?, SI).ok_or("no glean route")?;
    let local = main.get_route(&"10.0.0.1/32".parse()?, SI).ok_or("no local route")?;

    let neighbor = main
        .adjacencies_mut()
        .new_adj(1, Some(&Adjacency::new(LookupNext::Rewrite)))?;
    main.add_del_route(&"10.0.0.2/32".parse()?, FibIndex::DEFAULT, neighbor, false)?;

    main.sw_if_admin_up_down(SI, false)?;
    assert!(!main.is_admin_up(SI));
    assert!(main.fib(FibIndex::DEFAULT).ok_or("no table")?.is_empty());
    assert!(main.adjacencies().is_adj_free(glean));
    assert!(main.adjacencies().is_adj_free(local));
    // The neighbor adjacency belongs to whoever created it.
    assert!(!main.adjacencies().is_adj_free(neighbor));
    assert_eq!(main.if_address(ia).and_then(|ifa| ifa.glean_adj), None);

    main.sw_if_admin_up_down(SI, true)?;
    let glean = main.get_route(&"10.0.0.0/24".parse()?, SI).ok_or("no glean route")?;
    assert_eq!(lookup_next(&main, glean)?, LookupNext::Glean);
    assert_eq!(main.fib(FibIndex::DEFAULT).ok_or("no table")?.len(), 2);
    Ok(())
}

#[test]
fn deleting_an_address() -> Result<(), Box<dyn Error>> {
    crate::common::init();

    let mut main = Main::new()?;
    let address: Prefix = "10.0.0.1/24".parse()?;
    main.sw_if_admin_up_down(SI, true)?;
    let ia = main.add_del_interface_address(SI, &address, false)?;

    assert_eq!(main.add_del_interface_address(SI, &address, true)?, ia);
    assert!(main.fib(FibIndex::DEFAULT).ok_or("no table")?.is_empty());
    assert!(main.if_address(ia).is_none());
    assert!(main.if_addresses(SI).is_empty());
    assert_eq!(
        main.add_del_interface_address(SI, &address, true),
        Err(FibError::InterfaceAddressNotFound(address))
    );
    Ok(())
}

#[test]
fn moving_an_interface_to_another_table() -> Result<(), Box<dyn Error>> {
    crate::common::init();

    let mut main = Main::new()?;
    main.add_del_interface_address(SI, &"10.0.0.1/24".parse()?, false)?;
    main.sw_if_admin_up_down(SI, true)?;
    assert_eq!(main.fib(FibIndex::DEFAULT).ok_or("no table")?.len(), 2);

    main.set_interface_fib(SI, FibIndex(3))?;
    assert_eq!(main.fib_index_for_si(SI), FibIndex(3));
    assert!(main.fib(FibIndex::DEFAULT).ok_or("no table")?.is_empty());
    assert_eq!(main.fib(FibIndex(3)).ok_or("no table")?.len(), 2);
    let local = main.lookup(FibIndex(3), "10.0.0.1".parse()?)?;
    assert_eq!(lookup_next(&main, local)?, LookupNext::Local);
    Ok(())
}

#[test]
fn hooks_see_interface_changes() -> Result<(), Box<dyn Error>> {
    crate::common::init();

    let mut main = Main::new()?;

    let addresses: Arc<Mutex<Vec<(IfAddr, Prefix, bool)>>> = Arc::default();
    let a = Arc::clone(&addresses);
    main.register_if_addr_add_del_hook(Box::new(move |ia, ifa, is_del| {
        if let Ok(mut v) = a.lock() {
            v.push((ia, ifa.prefix, is_del));
        }
    }));

    let routes: Arc<Mutex<Vec<(Prefix, bool)>>> = Arc::default();
    let r = Arc::clone(&routes);
    main.register_fib_add_del_hook(Box::new(move |_, prefix, _, is_del| {
        if let Ok(mut v) = r.lock() {
            v.push((*prefix, is_del));
        }
    }));

    let gleans: Arc<Mutex<Vec<(Adj, bool)>>> = Arc::default();
    let g = Arc::clone(&gleans);
    main.adjacencies_mut()
        .register_adj_add_del_hook(Box::new(move |adj, block, is_del| {
            if block.iter().any(Adjacency::is_glean) {
                if let Ok(mut v) = g.lock() {
                    v.push((adj, is_del));
                }
            }
        }));

    let address: Prefix = "10.0.0.1/24".parse()?;
    let ia = main.add_del_interface_address(SI, &address, false)?;
    main.sw_if_admin_up_down(SI, true)?;
    let glean = main.get_route(&"10.0.0.0/24".parse()?, SI).ok_or("no glean route")?;
    main.add_del_interface_address(SI, &address, true)?;

    let addresses = addresses.lock().map(|v| v.clone()).unwrap_or_default();
    assert_eq!(addresses, vec![(ia, address, false), (ia, address, true)]);

    let net: Prefix = "10.0.0.0/24".parse()?;
    let host: Prefix = "10.0.0.1/32".parse()?;
    let routes = routes.lock().map(|v| v.clone()).unwrap_or_default();
    assert_eq!(
        routes,
        vec![(net, false), (host, false), (net, true), (host, true)]
    );

    let gleans = gleans.lock().map(|v| v.clone()).unwrap_or_default();
    assert_eq!(gleans, vec![(glean, false), (glean, true)]);
    Ok(())
}

#[test]
fn table_indexes_are_bounded() -> Result<(), Box<dyn Error>> {
    crate::common::init();

    let mut main = Main::new_with_config(FibConfig {
        max_fibs: 8,
        ..Default::default()
    })?;
    main.add_del_interface_address(SI, &"10.0.0.1/24".parse()?, false)?;
    main.sw_if_admin_up_down(SI, true)?;

    assert_eq!(
        main.set_interface_fib(SI, FibIndex(u32::MAX)),
        Err(FibError::UnknownFib(u32::MAX))
    );
    assert_eq!(
        main.set_interface_fib(SI, FibIndex(8)),
        Err(FibError::UnknownFib(8))
    );
    // Nothing moved.
    assert_eq!(main.fib_index_for_si(SI), FibIndex::DEFAULT);
    assert_eq!(main.fib(FibIndex::DEFAULT).ok_or("no table")?.len(), 2);
    assert_eq!(main.fib_indexes(), vec![FibIndex::DEFAULT]);

    let adj = main
        .adjacencies_mut()
        .new_adj(1, Some(&Adjacency::new(LookupNext::Rewrite)))?;
    assert_eq!(
        main.add_del_route(&"30.0.0.0/8".parse()?, FibIndex(1 << 20), adj, false),
        Err(FibError::UnknownFib(1 << 20))
    );
    main.set_interface_fib(SI, FibIndex(7))?;
    assert_eq!(main.fib(FibIndex(7)).ok_or("no table")?.len(), 2);
    Ok(())
}
