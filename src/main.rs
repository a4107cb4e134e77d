#[macro_use]
extern crate clap;

#[macro_use]
extern crate log;
extern crate env_logger;

use clap::{App, ArgMatches};
use std::env;
use std::process;

use xmlrpc_httpd::{MethodInfo, Result, ServerConfig, Value, XmlRpcServer};

fn main() {
    let matches = App::new("xmlrpcd")
        .version(&crate_version!()[..])
        .author("Damien Lecan <dev@dlecan.com>")
        .about("Demo XML-RPC server, answering the classic xmlrpclib multicall example")
        .args_from_usage(
            "-b --bind=[bind] 'Address to listen on, e.g. \"127.0.0.1:8000\"'
            [verbose]... -v 'Verbose mode'")
        .get_matches();

    // Init logging to DEBUG only if user required it
    if matches.is_present("verbose") {
        env::set_var("RUST_LOG", "DEBUG");
    }
    env_logger::init();

    if let Err(e) = run(&matches) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> Result<()> {
    let mut config = ServerConfig::default();
    if let Some(bind) = matches.value_of("bind") {
        config = config.with_bind_addr(bind.parse()?);
    }
    debug!("Using bind address: {}", config.bind_addr);

    let mut server = XmlRpcServer::new(&config)?;

    server.registry_mut().add_typed_method_with_info(
        "swapTwoIntegers",
        |a: i32, b: i32| vec![b, a],
        MethodInfo::new("Returns its two integer parameters swapped, as an array")
            .with_signature(&["array", "int", "int"]),
    )?;
    server.registry_mut().add_typed_method_with_info(
        "sortSomeDoubles",
        |mut values: Vec<f64>, ascending: bool| {
            values.sort_by(|a, b| a.total_cmp(b));
            if !ascending {
                values.reverse();
            }
            values
        },
        MethodInfo::new("Sorts an array of doubles, ascending unless the flag is false")
            .with_signature(&["array", "array", "boolean"]),
    )?;
    server.add_method_with_info(
        "superDynamicMethod",
        |params: &[Value]| {
            let names = params
                .iter()
                .map(|param| Value::from(param.type_name()))
                .collect();
            Ok(vec![Value::Array(names)])
        },
        MethodInfo::new("Returns the XML-RPC type name of each parameter"),
    )?;

    info!("Serving {}", server.list_methods().join(", "));
    server.spin()
}
